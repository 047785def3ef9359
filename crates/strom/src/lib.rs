#![forbid(unsafe_code)]

pub use strom_core as core;
pub use strom_xml as xml;
pub use strom_c14n as c14n;
pub use strom_crypto as crypto;
pub use strom_transforms as transforms;
pub use strom_stream as stream;
pub use strom_dsig as dsig;

pub use strom_core::{Error, Result, SecurityProperties};
