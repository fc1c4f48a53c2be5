//! cosem_rs — a client-side implementation of the DLMS/COSEM application
//! layer protocol for communicating with energy meters
//!
//! The workspace is layered bottom-up:
//!
//! - `cosem-core`: value types, OBIS codes, error handling
//! - `cosem-axdr`: A-XDR codec, streaming element reader, typed binding
//! - `cosem-transport`: byte-stream transports (TCP, test loopback)
//! - `cosem-session`: HDLC MAC and TCP wrapper session layers
//! - `cosem-security`: AES-GCM ciphering, cipher contexts, HLS digests
//! - `cosem-application`: xDLMS PDUs, ACSE association, V.44
//! - `cosem-client`: the session engine
//!
//! # Example
//!
//! ```no_run
//! use cosem::{ClientSettings, DlmsClient, WrapperSession};
//! use cosem::transport::TcpTransport;
//!
//! # async fn run() -> cosem::DlmsResult<()> {
//! let transport = TcpTransport::from_address("10.0.0.5:4059")?;
//! let session = WrapperSession::new(transport, 0x0010, 0x0001);
//! let settings = ClientSettings::with_low_authentication(b"12345678");
//! let mut client = DlmsClient::new(session, settings)?;
//! client.open().await?;
//!
//! let energy = cosem::CosemAttribute::new(
//!     3,
//!     cosem::ObisCode::from_string("1-0:1.8.0.255")?,
//!     2,
//! );
//! let values = client.get(&[energy]).await?;
//! println!("total energy: {}", values[0]);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub use cosem_core::{
    BitString, CompactArray, CompactArrayType, CosemDate, CosemDateTime, CosemTime,
    DataAccessResult, DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode,
};

pub use cosem_application::{
    ApplicationContext, Conformance, CosemAttribute, SelectiveAccess, SnItem,
};
pub use cosem_client::{ClientSettings, ClientState, DataStream, DlmsClient, SecuritySettings};
pub use cosem_security::AuthenticationMechanism;
pub use cosem_session::{HdlcConnection, HdlcSettings, SessionLayer, WrapperSession};

/// A-XDR codec and typed binding
pub mod axdr {
    pub use cosem_axdr::*;
}

/// Byte-stream transports
pub mod transport {
    pub use cosem_transport::*;
}

/// Ciphering and authentication primitives
pub mod security {
    pub use cosem_security::*;
}
