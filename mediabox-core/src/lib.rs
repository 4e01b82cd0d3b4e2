mod client;

pub use client::{
    ApiErrorClass, ObjectPage, RemoteObject, VaultClient, VaultError,
};
