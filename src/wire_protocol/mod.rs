pub mod backend;
pub mod format_code;
pub mod frontend;
pub mod lexer;
pub mod utils;

pub use backend::{BackendFrame, BackendMessage, BackendTag, TagSet};
pub use format_code::FormatCode;
pub use frontend::{EncodedMessage, FrontendFrame, FrontendMessage};
pub use lexer::{Lexed, lex_next};
