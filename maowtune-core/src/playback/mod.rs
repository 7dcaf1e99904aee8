pub mod clock;
pub mod manager;
pub mod notify;
pub mod queue;
pub mod session;

pub use clock::PlaybackClock;
pub use manager::SessionManager;
pub use notify::{ChannelNotifier, LogNotifier, PlaybackNotifier, TrackErrorNotice};
pub use queue::TrackQueue;
pub use session::{PlaybackSession, SessionSnapshot};
