//! Pure request/response codecs for the xDLMS services
//!
//! The codecs build request APDUs and parse response APDUs; the request/
//! response loops, block-transfer driving and ciphering live in the client.

pub mod action;
pub mod get;
pub mod read_write;
pub mod set;

pub use action::{decode_action_response, encode_action_next, encode_action_normal, ActionResponseBody};
pub use get::{
    decode_get_response, encode_get_next, encode_get_normal, encode_get_with_list, GetResponseBody,
};
pub use read_write::{
    decode_read_response, decode_write_response, encode_read_block_next, encode_read_request,
    encode_write_request, ReadResponseItem,
};
pub use set::{
    decode_set_response, encode_set_block, encode_set_first_block, encode_set_normal,
    encode_set_with_list, encode_set_with_list_first_block, SetResponseBody,
};
