// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{NetError, NetResult};

/// Wire format of composite values:
/// - strings: u16 length followed by that many bytes of utf-8
/// - byte blocks: u32 length followed by the raw bytes
/// - bool: a single byte, strictly 0 or 1
///
/// Every read is bounds-checked against the remaining payload; a short or
/// corrupt payload surfaces as `MalformedProtocol` instead of a panic.

macro_rules! define_read_int {
    ($fn_name:ident, $type:ty, $get_method:ident, $size:expr) => {
        pub fn $fn_name(&mut self) -> NetResult<$type> {
            if self.buf.remaining() < $size {
                return Err(NetError::MalformedProtocol(format!(
                    "can not read a {}, insufficient data",
                    stringify!($type)
                )));
            }
            Ok(self.buf.$get_method())
        }
    };
}

macro_rules! define_put_int {
    ($fn_name:ident, $type:ty, $put_method:ident) => {
        pub fn $fn_name(&mut self, value: $type) {
            self.buf.$put_method(value);
        }
    };
}

/// Reads payload fields out of a received frame.
///
/// The reader consumes the underlying buffer as it goes; fields a newer peer
/// appended after the ones known locally simply remain unread.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        PayloadReader { buf }
    }

    define_read_int!(read_u8, u8, get_u8, 1);
    define_read_int!(read_i8, i8, get_i8, 1);
    define_read_int!(read_u16, u16, get_u16, 2);
    define_read_int!(read_i16, i16, get_i16, 2);
    define_read_int!(read_u32, u32, get_u32, 4);
    define_read_int!(read_i32, i32, get_i32, 4);
    define_read_int!(read_u64, u64, get_u64, 8);
    define_read_int!(read_i64, i64, get_i64, 8);

    pub fn read_bool(&mut self) -> NetResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            invalid => Err(NetError::MalformedProtocol(format!(
                "invalid value {} for bool",
                invalid
            ))),
        }
    }

    pub fn read_string(&mut self) -> NetResult<String> {
        let length = self.read_u16()? as usize;
        if self.buf.remaining() < length {
            return Err(NetError::MalformedProtocol(
                "can not read a string, insufficient data".to_string(),
            ));
        }
        String::from_utf8(self.buf.split_to(length).to_vec())
            .map_err(|e| NetError::MalformedProtocol(e.to_string()))
    }

    pub fn read_bytes(&mut self) -> NetResult<Bytes> {
        let length = self.read_u32()? as usize;
        if self.buf.remaining() < length {
            return Err(NetError::MalformedProtocol(
                "can not read a byte block, insufficient data".to_string(),
            ));
        }
        Ok(self.buf.split_to(length).freeze())
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.remaining() == 0
    }
}

/// Appends payload fields to a frame under construction.
#[derive(Debug)]
pub struct PayloadWriter<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> PayloadWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        PayloadWriter { buf }
    }

    define_put_int!(put_u8, u8, put_u8);
    define_put_int!(put_i8, i8, put_i8);
    define_put_int!(put_u16, u16, put_u16);
    define_put_int!(put_i16, i16, put_i16);
    define_put_int!(put_u32, u32, put_u32);
    define_put_int!(put_i32, i32, put_i32);
    define_put_int!(put_u64, u64, put_u64);
    define_put_int!(put_i64, i64, put_i64);

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { 1 } else { 0 });
    }

    pub fn put_string(&mut self, value: &str) -> NetResult<()> {
        if value.len() > u16::MAX as usize {
            return Err(NetError::InvalidValue(format!(
                "string of {} bytes is too long for the wire",
                value.len()
            )));
        }
        self.buf.put_u16(value.len() as u16);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> NetResult<()> {
        if value.len() > u32::MAX as usize {
            return Err(NetError::InvalidValue(format!(
                "byte block of {} bytes is too long for the wire",
                value.len()
            )));
        }
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.buf.len()
    }
}
