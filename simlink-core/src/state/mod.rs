pub mod connection;
pub mod screen;

pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, RetryPolicy, SessionEndReason,
};
pub use screen::{LaunchContext, LoadingIntent, Role, ScreenFlow, ScreenState};
