pub mod frame;
pub mod read_cstr;

pub use frame::{
    HEADER_LEN, LEN_FIELD, MatchState, PayloadReader, check_frame_limit, declared_len, match_tagged,
};
pub use read_cstr::{ReadCStrError, read_cstr};
