//! authenticatorGetAssertion (0x02).
//!
//! The allowList cannot be resolved while the map is being walked: the
//! RP ID (and so the hash every candidate handle must be unwrapped
//! against) may arrive after it. The parser therefore stores the raw
//! value slice of the allowList and the processor re-decodes it with
//! [`AllowList`] once all fields are known.

use crate::cbor::{Reader, Writer};
use crate::credential::KeyHandle;
use crate::crypto::Signature;
use crate::ctap2::{AuthenticatorData, Error, Result};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request<'a> {
    pub rp_id: &'a str,
    pub client_data_hash: &'a [u8; 32],
    /// Raw CBOR encoding of the allowList array, if present.
    pub allow_list: Option<&'a [u8]>,
}

impl<'a> Request<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(data);

        let mut rp_id = None;
        let mut client_data_hash = None;
        let mut allow_list = None;

        let entries = reader.map()?;
        for _ in 0..entries {
            match reader.unsigned()? {
                1 => rp_id = Some(reader.text_string()?),
                2 => client_data_hash = Some(reader.byte_string()?),
                3 => allow_list = Some(reader.raw_value()?),
                // extensions, options, pinAuth, pinProtocol
                _ => reader.skip()?,
            }
        }

        let rp_id = rp_id.ok_or(Error::MissingParameter)?;
        let client_data_hash = client_data_hash.ok_or(Error::MissingParameter)?;
        let client_data_hash = client_data_hash
            .try_into()
            .map_err(|_| Error::InvalidLength)?;

        Ok(Self {
            rp_id,
            client_data_hash,
            allow_list,
        })
    }
}

/// Iterator over the credential IDs of a stored allowList slice.
///
/// Each element is a PublicKeyCredentialDescriptor map; only the "id"
/// entry matters here, everything else ("type", "transports", …) is
/// skipped.
pub struct AllowList<'a> {
    reader: Reader<'a>,
    remaining: usize,
}

impl<'a> AllowList<'a> {
    pub fn new(raw: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(raw);
        let remaining = reader.array()?;
        Ok(Self { reader, remaining })
    }

    fn descriptor_id(&mut self) -> Result<&'a [u8]> {
        let fields = self.reader.map()?;
        let mut id = None;
        for _ in 0..fields {
            match self.reader.text_string()? {
                "id" => id = Some(self.reader.byte_string()?),
                _ => self.reader.skip()?,
            }
        }
        id.ok_or(Error::MissingParameter)
    }
}

impl<'a> Iterator for AllowList<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.descriptor_id())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub credential_id: KeyHandle,
    pub auth_data: AuthenticatorData,
    pub signature: Signature,
}

impl Response {
    /// `{1: credential descriptor, 2: authData, 3: signature}`.
    pub fn serialize(&self, writer: &mut Writer) {
        writer.map(3);
        writer.unsigned(1);
        writer.map(2);
        writer.text_string("id");
        writer.byte_string(&self.credential_id);
        writer.text_string("type");
        writer.text_string("public-key");
        writer.unsigned(2);
        writer.byte_string(&self.auth_data);
        writer.unsigned(3);
        writer.byte_string(&self.signature);
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

    #[test]
    fn allow_list_may_precede_rp_id() {
        let data = encode(|w| {
            w.map(4);
            w.unsigned(3);
            w.array(2);
            w.map(2);
            w.text_string("id");
            w.byte_string(&[0x0a; 60]);
            w.text_string("type");
            w.text_string("public-key");
            w.map(3);
            w.text_string("id");
            w.byte_string(&[0x0b; 60]);
            w.text_string("type");
            w.text_string("public-key");
            w.text_string("transports");
            w.array(2);
            w.text_string("usb");
            w.text_string("nfc");
            w.unsigned(2);
            w.byte_string(&[0xcd; 32]);
            w.unsigned(1);
            w.text_string("example.com");
            w.unsigned(5);
            w.map(1);
            w.text_string("up");
            w.boolean(true);
        });

        let request = Request::parse(&data).unwrap();
        assert_eq!(request.rp_id, "example.com");

        let ids: std::vec::Vec<_> = AllowList::new(request.allow_list.unwrap())
            .unwrap()
            .map(|id| id.unwrap().to_vec())
            .collect();
        assert_eq!(ids, vec![vec![0x0a; 60], vec![0x0b; 60]]);
    }

    #[test]
    fn allow_list_is_optional() {
        let data = encode(|w| {
            w.map(2);
            w.unsigned(1);
            w.text_string("example.com");
            w.unsigned(2);
            w.byte_string(&[0xcd; 32]);
        });
        let request = Request::parse(&data).unwrap();
        assert!(request.allow_list.is_none());
    }

    #[test]
    fn missing_client_data_hash() {
        let data = encode(|w| {
            w.map(1);
            w.unsigned(1);
            w.text_string("example.com");
        });
        assert_eq!(Request::parse(&data), Err(Error::MissingParameter));
    }

    #[test]
    fn descriptor_without_id_errors() {
        let raw = encode(|w| {
            w.array(1);
            w.map(1);
            w.text_string("type");
            w.text_string("public-key");
        });
        let mut list = AllowList::new(&raw).unwrap();
        assert_eq!(list.next(), Some(Err(Error::MissingParameter)));
    }
}
