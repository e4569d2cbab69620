pub mod catalog;
pub mod clock;
pub mod content_service;
pub mod heartbeat_monitor;
pub mod live_state;
pub mod player_service;
pub mod schedule_service;
