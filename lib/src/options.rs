// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::time::Duration;

/// Transport options
#[derive(Clone, PartialEq, Debug, clap::Args)]
pub struct Options {
    /// Timeout for device responses (milliseconds), commands awaiting
    /// user interaction are exempt
    #[clap(long, default_value_t = 2000)]
    pub request_timeout_ms: u64,

    /// Tunnel V1 commands through the V2 packet layer
    #[clap(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub auto_tunnel: bool,
}

impl Options {
    /// Helper to fetch request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2000,
            auto_tunnel: true,
        }
    }
}
