pub mod edns;
pub mod header;
pub mod message;
pub mod name;
pub mod question;
pub mod resource;
pub mod types;

pub use header::Header;
pub use message::Message;
pub use question::Question;
pub use resource::ResourceRecord;
pub use types::{Opcode, RecordClass, RecordType};
