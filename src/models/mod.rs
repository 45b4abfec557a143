pub mod bundle;
pub mod call;
pub mod otp;
pub mod personalization;
pub mod schedule;
pub mod user;

pub use bundle::Bundle;
pub use call::{failure, CallAttempt, CallStatus};
pub use otp::{OtpCode, OtpPurpose};
pub use personalization::{Personalization, VoicePersona};
pub use schedule::{Recurrence, Schedule, WeekdaySet};
pub use user::{valid_e164, Session, User};
