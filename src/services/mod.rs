pub mod auth;
pub mod messaging;
pub mod recurrence;
pub mod scheduler;
pub mod script;
pub mod telephony;
