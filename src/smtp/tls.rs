/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{io, sync::Arc};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::{Error, SmtpClient};

use super::{stream::MailStream, AssertReply};

impl SmtpClient<TcpStream> {
    /// Issues STARTTLS and upgrades the session.
    pub async fn start_tls(
        mut self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<SmtpClient<MailStream>> {
        self.cmd(b"STARTTLS\r\n")
            .await?
            .assert_positive_completion()?;

        self.into_tls(tls_connector, hostname).await
    }

    /// Runs the TLS handshake on the raw socket. Capabilities advertised
    /// before the handshake are discarded.
    pub async fn into_tls(
        self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<SmtpClient<MailStream>> {
        let server_name = ServerName::try_from(hostname)
            .map_err(|_| Error::InvalidTLSName)?
            .to_owned();
        let stream = tokio::time::timeout(
            self.timeout,
            tls_connector.connect(server_name, self.stream),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(handshake_error)?;

        Ok(SmtpClient {
            stream: MailStream::Tls(stream),
            timeout: self.timeout,
            capabilities: Default::default(),
        })
    }
}

fn handshake_error(err: io::Error) -> Error {
    let kind = err.kind();
    match err.into_inner().map(|inner| inner.downcast::<rustls::Error>()) {
        Some(Ok(err)) => Error::Tls(err),
        Some(Err(err)) => Error::Io(io::Error::new(kind, err)),
        None => Error::Io(io::Error::new(kind, "TLS handshake failed")),
    }
}

/// Builds the connector used for implicit TLS and STARTTLS. With
/// `allow_invalid_certs` the server certificate is not verified.
pub fn build_tls_connector(allow_invalid_certs: bool) -> TlsConnector {
    let builder = ClientConfig::builder();
    let config = if allow_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerification))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            })
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

const VERIFY_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::RSA_PKCS1_SHA512,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PSS_SHA512,
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ECDSA_NISTP521_SHA512,
    SignatureScheme::ED25519,
];

#[derive(Debug)]
struct NoCertVerification;

impl ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        VERIFY_SCHEMES.to_vec()
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use crate::Error;

    use super::handshake_error;

    #[test]
    fn tls_handshake_errors() {
        assert!(matches!(
            handshake_error(io::Error::new(
                io::ErrorKind::InvalidData,
                rustls::Error::InvalidCertificate(rustls::CertificateError::Expired),
            )),
            Error::Tls(_)
        ));
        assert!(matches!(
            handshake_error(io::ErrorKind::ConnectionReset.into()),
            Error::Io(err) if err.kind() == io::ErrorKind::ConnectionReset
        ));
    }
}
