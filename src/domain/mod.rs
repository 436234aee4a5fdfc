pub mod chat;
pub mod config;
pub mod event;
pub mod group;
pub mod session;

pub use chat::{ChatMessage, SenderKind};
pub use config::{
    Action, AgentConfig, AnswerShape, Branch, Button, CanonicalConfig, Component, ComponentKind,
    FieldType, MatchmakingComponentProps, MatchmakingPoolConfig, Page, SurveyQuestion,
    SurveyQuestionKind, ToolSchema, UserStateSchema,
};
pub use event::{Event, EventType};
pub use group::{Group, MatchPoolEntry};
pub use session::{Session, SessionStatus};
