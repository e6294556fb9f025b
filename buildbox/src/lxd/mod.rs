//! LXD backend: client contract, command-line client, instance handle and
//! provider.

mod cli;
mod client;
mod instance;
mod intermediate;
mod provider;

pub use cli::LxcCli;
pub use client::{
    ImageAlias, ImageEntry, InstanceEntry, InstanceRef, LaunchRequest, LxcClient,
    PublishRequest, PushOptions, RemoteConfig,
};
pub use instance::{Lifetime, LxdInstance};
pub use intermediate::IntermediateImageKey;
pub use provider::LxdProvider;
