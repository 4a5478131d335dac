//! authenticatorMakeCredential (0x01).
//!
//! The parameter map is parsed in two passes: the entry loop records or
//! skips each value by key, and validation happens only once the whole
//! map has been walked. Clients are free to send keys in any order and
//! to include parameters we do not implement (excludeList, extensions,
//! options, pinAuth, pinProtocol); those are skipped wholesale.

use crate::cbor::{Reader, Writer};
use crate::cose;
use crate::crypto::Signature;
use crate::ctap2::{AuthenticatorData, Error, Result};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request<'a> {
    pub client_data_hash: &'a [u8; 32],
    pub rp_id: &'a str,
    pub user_id: &'a [u8],
}

impl<'a> Request<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(data);

        let mut client_data_hash = None;
        let mut rp_id = None;
        let mut user_id = None;
        let mut algorithms = None;

        let entries = reader.map()?;
        for _ in 0..entries {
            match reader.unsigned()? {
                1 => client_data_hash = Some(reader.byte_string()?),
                2 => rp_id = Some(parse_rp(&mut reader)?),
                3 => user_id = Some(parse_user(&mut reader)?),
                4 => algorithms = Some(parse_algorithms(&mut reader)?),
                _ => reader.skip()?,
            }
        }

        let client_data_hash = client_data_hash.ok_or(Error::MissingParameter)?;
        let client_data_hash = client_data_hash
            .try_into()
            .map_err(|_| Error::InvalidLength)?;
        let rp_id = rp_id.ok_or(Error::MissingParameter)?;
        let user_id = user_id.ok_or(Error::MissingParameter)?;
        if !algorithms.ok_or(Error::MissingParameter)? {
            return Err(Error::UnsupportedAlgorithm);
        }

        Ok(Self {
            client_data_hash,
            rp_id,
            user_id,
        })
    }
}

fn parse_rp<'a>(reader: &mut Reader<'a>) -> Result<&'a str> {
    let entries = reader.map()?;
    let mut id = None;
    for _ in 0..entries {
        match reader.text_string()? {
            "id" => id = Some(reader.text_string()?),
            // name, icon
            _ => reader.skip()?,
        }
    }
    id.ok_or(Error::MissingParameter)
}

fn parse_user<'a>(reader: &mut Reader<'a>) -> Result<&'a [u8]> {
    let entries = reader.map()?;
    let mut id = None;
    for _ in 0..entries {
        match reader.text_string()? {
            "id" => id = Some(reader.byte_string()?),
            // name, displayName, icon
            _ => reader.skip()?,
        }
    }
    id.ok_or(Error::MissingParameter)
}

/// Walk pubKeyCredParams; true if ES256 over "public-key" is offered.
fn parse_algorithms(reader: &mut Reader) -> Result<bool> {
    let entries = reader.array()?;
    let mut es256 = false;
    for _ in 0..entries {
        let fields = reader.map()?;
        let mut alg = None;
        let mut key_type = None;
        for _ in 0..fields {
            match reader.text_string()? {
                "alg" => alg = Some(reader.integer()?),
                "type" => key_type = Some(reader.text_string()?),
                _ => reader.skip()?,
            }
        }
        if alg == Some(cose::ES256.into()) && key_type == Some("public-key") {
            es256 = true;
        }
    }
    Ok(es256)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub auth_data: AuthenticatorData,
    pub att_stmt_signature: Signature,
}

impl Response {
    /// `{1: fmt, 2: authData, 3: attStmt}` with a packed statement.
    pub fn serialize(&self, writer: &mut Writer) {
        writer.map(3);
        writer.unsigned(1);
        writer.text_string("packed");
        writer.unsigned(2);
        writer.byte_string(&self.auth_data);
        writer.unsigned(3);
        writer.map(2);
        writer.text_string("alg");
        writer.integer(cose::ES256.into());
        writer.text_string("sig");
        writer.byte_string(&self.att_stmt_signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::Writer;

    fn encode(f: impl FnOnce(&mut Writer)) -> std::vec::Vec<u8> {
        let mut buf = [0u8; 512];
        let mut writer = Writer::new(&mut buf);
        f(&mut writer);
        let length = writer.finish().unwrap();
        buf[..length].to_vec()
    }

    fn write_rp(writer: &mut Writer, id: &str) {
        writer.map(2);
        writer.text_string("id");
        writer.text_string(id);
        writer.text_string("name");
        writer.text_string("Example");
    }

    fn write_user(writer: &mut Writer, id: &[u8]) {
        writer.map(2);
        writer.text_string("id");
        writer.byte_string(id);
        writer.text_string("name");
        writer.text_string("alice");
    }

    fn write_params(writer: &mut Writer, alg: i64) {
        writer.array(1);
        writer.map(2);
        writer.text_string("alg");
        writer.integer(alg);
        writer.text_string("type");
        writer.text_string("public-key");
    }

    #[test]
    fn parses_in_request_order() {
        let data = encode(|w| {
            w.map(4);
            w.unsigned(1);
            w.byte_string(&[0xcd; 32]);
            w.unsigned(2);
            write_rp(w, "example.com");
            w.unsigned(3);
            write_user(w, &[0x1d; 16]);
            w.unsigned(4);
            write_params(w, -7);
        });
        let request = Request::parse(&data).unwrap();
        assert_eq!(request.rp_id, "example.com");
        assert_eq!(request.user_id, &[0x1d; 16]);
        assert_eq!(request.client_data_hash, &[0xcd; 32]);
    }

    #[test]
    fn parses_in_reverse_order_with_unknown_keys() {
        let data = encode(|w| {
            w.map(6);
            // options first
            w.unsigned(7);
            w.map(1);
            w.text_string("rk");
            w.boolean(false);
            w.unsigned(4);
            write_params(w, -7);
            w.unsigned(3);
            write_user(w, &[0x1d; 16]);
            w.unsigned(2);
            write_rp(w, "example.com");
            w.unsigned(1);
            w.byte_string(&[0xcd; 32]);
            // excludeList with nested transports last
            w.unsigned(5);
            w.array(1);
            w.map(3);
            w.text_string("id");
            w.byte_string(&[9; 60]);
            w.text_string("type");
            w.text_string("public-key");
            w.text_string("transports");
            w.array(1);
            w.text_string("usb");
        });
        let request = Request::parse(&data).unwrap();
        assert_eq!(request.rp_id, "example.com");
    }

    #[test]
    fn missing_user_is_reported() {
        let data = encode(|w| {
            w.map(3);
            w.unsigned(1);
            w.byte_string(&[0xcd; 32]);
            w.unsigned(2);
            write_rp(w, "example.com");
            w.unsigned(4);
            write_params(w, -7);
        });
        assert_eq!(Request::parse(&data), Err(Error::MissingParameter));
    }

    #[test]
    fn es256_must_be_offered() {
        let data = encode(|w| {
            w.map(4);
            w.unsigned(1);
            w.byte_string(&[0xcd; 32]);
            w.unsigned(2);
            write_rp(w, "example.com");
            w.unsigned(3);
            write_user(w, &[0x1d; 16]);
            w.unsigned(4);
            write_params(w, -257); // RS256 only
        });
        assert_eq!(Request::parse(&data), Err(Error::UnsupportedAlgorithm));
    }

    #[test]
    fn short_client_data_hash_is_invalid() {
        let data = encode(|w| {
            w.map(4);
            w.unsigned(1);
            w.byte_string(&[0xcd; 16]);
            w.unsigned(2);
            write_rp(w, "example.com");
            w.unsigned(3);
            write_user(w, &[0x1d; 16]);
            w.unsigned(4);
            write_params(w, -7);
        });
        assert_eq!(Request::parse(&data), Err(Error::InvalidLength));
    }

    #[test]
    fn garbage_is_invalid_cbor() {
        assert_eq!(Request::parse(&[0x5f]), Err(Error::InvalidCbor));
    }
}
