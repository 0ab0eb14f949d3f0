#![forbid(unsafe_code)]

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;

pub mod crypto {
    pub mod aead;
    pub mod agree;
    pub mod kdf;
    pub mod sign;
    pub mod wipe;
}

pub mod textio {
    pub mod framing;
}

pub mod keys {
    pub mod export;
    pub mod ident;
    pub mod info;
    pub mod keystore;
    pub mod pairstore;
}

pub mod stream {
    pub mod block;
    pub mod compress;
    pub mod decode;
    pub mod encode;
    pub mod tree;
}

pub mod symfile {
    pub mod header;
    pub mod metadata;
    pub mod reader;
    pub mod writer;
}

pub mod bundle {
    pub mod header;
    pub mod reader;
    pub mod writer;
}

pub mod backup;
pub mod config;

pub use crate::error::{Result, SatchelError};

pub use keys::info::{Entity, KeyInfo, KeyPairInfo};
pub use keys::keystore::Keystore;
pub use keys::pairstore::KeypairStore;

pub use stream::decode::{Choice, OverwriteDecider, TreeWriter};
pub use stream::encode::TreeStream;
pub use stream::tree::{ScanOptions, Tree, TreeScanner};

pub use symfile::metadata::{MetadataCollection, MetadataItem};
pub use symfile::reader::{read_symfile, read_symfile_metadata};
pub use symfile::writer::{
    write_symfile_from_dirs, write_symfile_from_file, write_symfile_from_reader,
};

pub use bundle::header::{BundleInfo, InputSource};

pub use config::{Config, Profile};

pub mod prelude {
    pub use crate::Result;
    pub use crate::bundle::header::{BundleInfo, InputSource};
    pub use crate::config::{Config, Profile};
    pub use crate::keys::info::{Entity, KeyInfo, KeyPairInfo};
    pub use crate::stream::tree::{ScanOptions, Tree, TreeScanner};
    pub use crate::symfile::metadata::MetadataCollection;
}
