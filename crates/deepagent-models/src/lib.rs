mod scripted;
pub use scripted::ScriptedChatModel;

mod bound_tools;
pub use bound_tools::BoundToolsChatModel;
