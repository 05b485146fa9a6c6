//! Dual-panel reading: synchronized original/translated views and the
//! per-book reading session behind them.

pub mod session;
pub mod sync;

pub use session::{Bookmark, ReadingSession, SessionStore};
pub use sync::{
    DualPanelReader, PageSubscription, Panel, ReaderSettings, ReaderSnapshot, ScrollPositions,
    TranslationState,
};
