//! Network transport: QUIC endpoint/certificate setup and the length-prefixed frame protocol
//! carried over each connection's single bidirectional stream.

use itertools::Itertools;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::version::TLS13;
use rustls::{DigitallySignedStruct, Error, SignatureScheme, SupportedProtocolVersion};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::prelude::*;

/// The insecure server TLS verifier that does not actually check anything at all.
///
/// Dedicated servers self-sign; clients in this ecosystem pin the server's identity out of
/// band (e.g. a server browser listing), so certificate validation isn't the channel's job.
#[derive(Debug)]
pub struct NoopServerTlsVerification(Arc<rustls::crypto::CryptoProvider>);

impl NoopServerTlsVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self(Arc::new(rustls::crypto::aws_lc_rs::default_provider())))
    }
}

impl ServerCertVerifier for NoopServerTlsVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

static ALPN_VOXEDGE: &[&[u8]] = &[b"voxedge/1"];
static TLS_PROTO_VERSIONS: &[&SupportedProtocolVersion] = &[&TLS13];

/// Makes a simple QUINN endpoint client config object.
pub fn quinn_client_config() -> quinn::ClientConfig {
    let mut crypto = rustls::ClientConfig::builder_with_protocol_versions(TLS_PROTO_VERSIONS)
        .dangerous()
        .with_custom_certificate_verifier(NoopServerTlsVerification::new())
        .with_no_client_auth();
    crypto.alpn_protocols = ALPN_VOXEDGE.iter().map(|a| a.to_vec()).collect_vec();
    quinn::ClientConfig::new(Arc::new(QuicClientConfig::try_from(crypto).unwrap()))
}

/// Makes a simple QUINN endpoint server config object, with a freshly generated self-signed
/// certificate.
pub fn quinn_server_config() -> quinn::ServerConfig {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    let cert = cert.cert.into();

    let mut crypto = rustls::ServerConfig::builder_with_protocol_versions(TLS_PROTO_VERSIONS)
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    crypto.alpn_protocols = ALPN_VOXEDGE.iter().map(|a| a.to_vec()).collect_vec();
    quinn::ServerConfig::with_crypto(Arc::new(QuicServerConfig::try_from(crypto).unwrap()))
}

/// Frame type tag for the single framed channel (§4.7): a control message (JSON) or a binary
/// `CHUNK_FULL` codec frame.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum FrameTag {
    /// A JSON-encoded control message (`player_move`, `chunk_have`, `world_init`, ...).
    Control = 0,
    /// A binary `CHUNK_FULL` frame as produced by [`vox_schemas::codec`].
    ChunkFull = 1,
}

impl FrameTag {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::Control),
            1 => Ok(Self::ChunkFull),
            other => bail!("unknown frame tag {other}"),
        }
    }
}

/// Maximum accepted frame payload size, guarding against a malicious or corrupt length prefix
/// causing an unbounded allocation.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Writes one frame: `u8` tag, `u32` little-endian payload length, then the payload.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, tag: FrameTag, payload: &[u8]) -> Result<()> {
    ensure!(payload.len() as u64 <= MAX_FRAME_LEN as u64, "frame payload too large");
    let mut header = [0u8; 5];
    header[0] = tag as u8;
    header[1..5].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    w.write_all(&header).await?;
    w.write_all(payload).await?;
    Ok(())
}

/// Reads one frame written by [`write_frame`].
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(FrameTag, Vec<u8>)> {
    let mut header = [0u8; 5];
    r.read_exact(&mut header).await?;
    let tag = FrameTag::from_byte(header[0])?;
    let len = u32::from_le_bytes(header[1..5].try_into().unwrap());
    ensure!(len <= MAX_FRAME_LEN, "frame payload too large ({len} bytes)");
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;
    Ok((tag, payload))
}
