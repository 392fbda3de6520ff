// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Physical link abstraction
//!
//! Implemented by USB / HID / Bluetooth drivers (and the simulator). Inbound
//! packets are pushed to the transport via [crate::Receiver::receive_data]
//! in arrival order, one call per packet.

use std::sync::Arc;

use async_trait::async_trait;

/// Physical link to a device
#[async_trait]
pub trait Physical: Send + Sync {
    /// Packet size for the link, fixed for the life of a session
    fn packet_size(&self) -> usize;

    /// Write a single packet to the device
    async fn write(&self, packet: &[u8]) -> anyhow::Result<()>;
}

/// Shared physical links, allowing drivers to be held by both the
/// transport and their inbound delivery task
#[async_trait]
impl<T: Physical + ?Sized> Physical for Arc<T> {
    fn packet_size(&self) -> usize {
        self.as_ref().packet_size()
    }

    async fn write(&self, packet: &[u8]) -> anyhow::Result<()> {
        self.as_ref().write(packet).await
    }
}
