// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The XML wire adapter (C5): outbound serialization of bus notifications,
//! inbound parsing of client writes, BLOB base64 framing, and the adapter
//! that couples both directions to one stream.

pub mod adapter;
pub mod blob;
pub mod inbound;
pub mod outbound;

pub use adapter::{FrameSplitter, WireAdapterConfig, XmlAdapter};
pub use inbound::{BlobPolicy, InboundRequest};
pub use outbound::XmlOutbound;
