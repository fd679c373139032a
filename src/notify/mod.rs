//! Notification delivery: providers per channel and the fan-out router.

pub mod ntfy;
pub mod provider;
pub mod router;
pub mod voice;

pub use ntfy::{NtfyConfig, NtfyProvider};
pub use provider::{DeliveryResult, NotificationProvider};
pub use router::NotificationRouter;
pub use voice::{VoiceConfig, VoiceProvider};
