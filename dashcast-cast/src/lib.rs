//! Cast device supervision
//!
//! Keeps remote playback devices showing their assigned room: discovery
//! announces devices, the [`DeviceRegistry`] runs one [`DeviceSupervisor`]
//! per device, and each supervisor drives its receiver through the
//! [`CastConnector`] interface.

pub mod device;
pub mod discovery;
pub mod error;
pub mod http;
pub mod mdns;
pub mod registry;
pub mod sdk;
pub mod supervisor;

pub use device::{DeviceEvent, DeviceRecord, DeviceState, PlaybackMonitor, PlaybackVerdict, StallReason};
pub use discovery::{Announcer, DeviceAnnouncement, Discovery, StaticDiscovery};
pub use error::CastError;
pub use http::HttpCastConnector;
pub use mdns::MdnsDiscovery;
pub use registry::DeviceRegistry;
pub use sdk::{
    ApplicationStatus, CastConnection, CastConnector, MediaDescriptor, PlayerState, PlayerStatus, ReceiverSession,
    ReceiverStatus,
};
pub use supervisor::{DeviceHandle, DeviceSupervisor, SupervisionEnd, SupervisorSettings};
