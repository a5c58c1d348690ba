//! Module for the protocol messages exchanged with clients.
//!
//! The message structs mirror the wire schema and carry prost field
//! attributes in the same shape `prost-build` emits, so the encoding is
//! exactly what a generated module would produce. A frame on the stream is a
//! varint length followed by the message bytes; the [`decode_request`] and
//! [`encode_response`] helpers speak that framing so the transport does not
//! have to.
use crate::error::Error;
use prost::Message;

/// A single procedure call sent by a client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    /// Name of the service the procedure belongs to.
    #[prost(string, tag = "1")]
    pub service: ::prost::alloc::string::String,
    /// Name of the procedure to call.
    #[prost(string, tag = "2")]
    pub procedure: ::prost::alloc::string::String,
    /// The arguments, in any order and possibly sparse.
    #[prost(message, repeated, tag = "3")]
    pub arguments: ::prost::alloc::vec::Vec<Argument>,
}

/// One positional argument of a request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Argument {
    /// Zero-based parameter position.
    #[prost(uint32, tag = "1")]
    pub position: u32,
    /// The encoded value for the parameter at that position.
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

/// The reply to a single request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    /// In-simulation time at which the response was finalized.
    #[prost(double, tag = "1")]
    pub time: f64,
    /// Empty on success; otherwise a `Kind: detail` diagnostic.
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
    /// The encoded return value, when the procedure produced one.
    #[prost(bytes = "vec", optional, tag = "3")]
    pub return_value: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}

/// Wire shape of a list value: each entry is an encoded element.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct List {
    /// The encoded elements, in order.
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

/// Wire shape of a set value; entries are unordered and unique.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Set {
    /// The encoded elements.
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

/// Wire shape of a dictionary value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Dictionary {
    /// The key/value entries; keys must be unique.
    #[prost(message, repeated, tag = "1")]
    pub entries: ::prost::alloc::vec::Vec<DictionaryEntry>,
}

/// One key/value pair of a dictionary value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DictionaryEntry {
    /// The encoded key.
    #[prost(bytes = "vec", tag = "1")]
    pub key: ::prost::alloc::vec::Vec<u8>,
    /// The encoded value.
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

/// Wire shape of a tuple value; the element count equals the tuple arity.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Tuple {
    /// The encoded elements, one per tuple slot.
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub items: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

/// Decodes a length-prefixed request frame.
pub fn decode_request(frame: &[u8]) -> Result<Request, Error> {
    Request::decode_length_delimited(frame)
        .map_err(|e| Error::InvalidArgument(format!("malformed request frame: {}", e)))
}

/// Encodes a response into a length-prefixed frame ready for the stream.
pub fn encode_response(response: &Response) -> Vec<u8> {
    response.encode_length_delimited_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_round_trips_a_request_frame() {
        let request = Request {
            service: "Flight".to_string(),
            procedure: "get_Throttle".to_string(),
            arguments: vec![Argument {
                position: 0,
                value: vec![0x08],
            }],
        };

        let frame = request.encode_length_delimited_to_vec();
        let decoded = decode_request(&frame).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn it_rejects_a_truncated_frame() {
        let request = Request {
            service: "Flight".to_string(),
            procedure: "Launch".to_string(),
            arguments: Vec::new(),
        };

        let frame = request.encode_length_delimited_to_vec();
        let err = decode_request(&frame[..frame.len() - 1]).unwrap_err();

        assert!(err.to_string().starts_with("InvalidArgument: "));
    }

    #[test]
    fn it_omits_the_return_value_when_absent() {
        let response = Response {
            time: 12.5,
            error: String::new(),
            return_value: None,
        };

        let frame = encode_response(&response);
        let decoded = Response::decode_length_delimited(frame.as_slice()).unwrap();

        assert_eq!(decoded.return_value, None);
        assert_eq!(decoded.time, 12.5);
    }
}
