//! Presentation-layer state for the quest client: the transcript store, the
//! responding indicator, the composer, and the controllers that tie them to
//! the backend and the realtime feed.

pub mod composer;
pub mod guide;
pub mod quest_list;
pub mod responding;
pub mod store;
pub mod view;

pub use composer::{Composer, GENERATE_COMMAND, Outgoing};
pub use guide::{GUIDE_SAVED_TOAST, GuideEditor};
pub use quest_list::QuestList;
pub use responding::RespondingState;
pub use store::{MessageStore, current_suggestions};
pub use view::{DeleteState, QuestView, Route, ViewCommand, ViewUpdate};
