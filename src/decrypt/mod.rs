pub mod decryptor;

pub use decryptor::{DecryptedInput, Decryptor};
