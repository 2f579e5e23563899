//! Built-in plugins. A fresh `frippyd` ships only [`unicode::Unicode`];
//! anything else is loaded at runtime via the native/script loaders in
//! [`crate::plugin`].

pub mod unicode;
