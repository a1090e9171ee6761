//! startup message and password/md5/scram authentication exchange.
//! runs during the blocking half of connection setup.

use std::io::{Read, Write};

use bytes::BytesMut;
use fallible_iterator::FallibleIterator;
use postgres_protocol::{
    authentication::{self, sasl},
    message::{backend, frontend},
};

use crate::{
    config::Config,
    error::{ConfigError, ConnectionError, DbError, Error, unexpected_eof_err},
};

use super::RawIo;

pub(super) fn authenticate(io: &mut RawIo, read_buf: &mut BytesMut, cfg: &Config) -> Result<(), Error> {
    let mut buf = BytesMut::new();

    let mut params = vec![("client_encoding", "UTF8")];
    if let Some(user) = cfg.get_user() {
        params.push(("user", user));
    }
    if let Some(dbname) = cfg.get_dbname() {
        params.push(("database", dbname));
    }
    if let Some(options) = cfg.get_options() {
        params.push(("options", options));
    }
    if let Some(application_name) = cfg.get_application_name() {
        params.push(("application_name", application_name));
    }

    frontend::startup_message(params, &mut buf)?;
    send(io, &mut buf)?;

    loop {
        match recv(io, read_buf)? {
            backend::Message::AuthenticationOk => return Ok(()),
            backend::Message::AuthenticationCleartextPassword => {
                let pass = cfg.get_password().ok_or(ConfigError::MissingPassWord)?;
                frontend::password_message(pass, &mut buf)?;
                send(io, &mut buf)?;
            }
            backend::Message::AuthenticationMd5Password(body) => {
                let pass = cfg.get_password().ok_or(ConfigError::MissingPassWord)?;
                let user = cfg.get_user().ok_or(ConfigError::MissingUserName)?.as_bytes();
                let hashed = authentication::md5_hash(user, pass, body.salt());
                frontend::password_message(hashed.as_bytes(), &mut buf)?;
                send(io, &mut buf)?;
            }
            backend::Message::AuthenticationSasl(body) => {
                sasl_exchange(io, read_buf, cfg, body)?;
            }
            backend::Message::ErrorResponse(body) => {
                return Err(DbError::parse(&mut body.fields())?.into());
            }
            _ => return Err(Error::unexpected()),
        }
    }
}

fn sasl_exchange(
    io: &mut RawIo,
    read_buf: &mut BytesMut,
    cfg: &Config,
    body: backend::AuthenticationSaslBody,
) -> Result<(), Error> {
    let pass = cfg.get_password().ok_or(ConfigError::MissingPassWord)?;

    let mut is_scram = false;
    let mut is_scram_plus = false;
    let mut mechanisms = body.mechanisms();
    while let Some(mechanism) = mechanisms.next()? {
        match mechanism {
            sasl::SCRAM_SHA_256 => is_scram = true,
            sasl::SCRAM_SHA_256_PLUS => is_scram_plus = true,
            _ => {}
        }
    }

    let (channel_binding, mechanism) = match (is_scram_plus, is_scram) {
        (true, is_scram) => match (io.tls_server_end_point(), is_scram) {
            (Some(digest), _) => (sasl::ChannelBinding::tls_server_end_point(digest), sasl::SCRAM_SHA_256_PLUS),
            (None, true) => (sasl::ChannelBinding::unrequested(), sasl::SCRAM_SHA_256),
            (None, false) => {
                return Err(ConnectionError::Handshake(String::from(
                    "server requires channel binding but no tls endpoint is available",
                ))
                .into())
            }
        },
        (false, true) => (sasl::ChannelBinding::unrequested(), sasl::SCRAM_SHA_256),
        (false, false) => {
            return Err(ConnectionError::Handshake(String::from("unsupported SASL mechanism")).into())
        }
    };

    let mut scram = sasl::ScramSha256::new(pass, channel_binding);
    let mut buf = BytesMut::new();

    frontend::sasl_initial_response(mechanism, scram.message(), &mut buf)?;
    send(io, &mut buf)?;

    match recv(io, read_buf)? {
        backend::Message::AuthenticationSaslContinue(body) => {
            scram.update(body.data())?;
            frontend::sasl_response(scram.message(), &mut buf)?;
            send(io, &mut buf)?;
        }
        backend::Message::ErrorResponse(body) => return Err(DbError::parse(&mut body.fields())?.into()),
        _ => return Err(Error::unexpected()),
    }

    match recv(io, read_buf)? {
        backend::Message::AuthenticationSaslFinal(body) => scram.finish(body.data())?,
        backend::Message::ErrorResponse(body) => return Err(DbError::parse(&mut body.fields())?.into()),
        _ => return Err(Error::unexpected()),
    }

    Ok(())
}

fn send(io: &mut RawIo, buf: &mut BytesMut) -> Result<(), Error> {
    let msg = buf.split();
    io.write_all(&msg).map_err(|e| ConnectionError::Handshake(e.to_string()))?;
    io.flush().map_err(|e| ConnectionError::Handshake(e.to_string()))?;
    Ok(())
}

fn recv(io: &mut RawIo, read_buf: &mut BytesMut) -> Result<backend::Message, Error> {
    loop {
        if let Some(msg) = backend::Message::parse(read_buf)? {
            return Ok(msg);
        }
        let mut chunk = [0u8; 8 * 1024];
        match io.read(&mut chunk) {
            Ok(0) => return Err(unexpected_eof_err().into()),
            Ok(n) => read_buf.extend_from_slice(&chunk[..n]),
            Err(e) => return Err(ConnectionError::Handshake(e.to_string()).into()),
        }
    }
}
