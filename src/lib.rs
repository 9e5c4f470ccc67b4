
#[macro_use] extern crate bitflags;


mod acks;
mod bits;
mod decoder;
mod encoder;
mod error;
mod field;
mod helper;
pub mod huffman;
mod inst;
mod repr;
pub mod table;

pub use acks::AckRecord;
pub use decoder::{Decoder, DecoderConfig};
pub use encoder::{Encoder, EncoderConfig};
pub use error::{QpackError, QpackResult};
pub use field::{FieldFlag, HeaderField, StreamIdentifier};
pub use helper::Helper;
pub use huffman::{HuffmanDecoderError, HuffmanPreference};
pub use inst::TableUpdate;
pub use repr::Repr;
