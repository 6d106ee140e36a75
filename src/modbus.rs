use tokio_util::bytes::{Buf as _, BufMut as _, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Thermia controllers expose a single Modbus node.
pub const UNIT_ID: u8 = 1;
pub const DEFAULT_PORT: u16 = 502;

/// Transaction id, protocol id, length and unit id.
const MBAP_HEADER_LENGTH: usize = 7;
const MAX_PDU_LENGTH: usize = 253;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the device closed the connection")]
    Disconnected,
    #[error(
        "device responded to function {function:#04x} with exception {code:#04x} ({})",
        exception_name(.code)
    )]
    Exception { function: u8, code: u8 },
    #[error("device responded to function {expected:#04x} with a response to {actual:#04x}")]
    UnexpectedResponse { expected: u8, actual: u8 },
    #[error("response to function {0:#04x} did not carry the requested value")]
    ShortResponse(u8),
    #[error("response to function {0:#04x} is malformed")]
    MalformedResponse(u8),
}

fn exception_name(code: &u8) -> &'static str {
    match *code {
        1 => "illegal function",
        2 => "illegal data address",
        3 => "illegal data value",
        4 => "server device failure",
        5 => "acknowledge",
        6 => "server device busy",
        10 => "gateway path unavailable",
        11 => "gateway target device failed to respond",
        _ => "unknown exception",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadCoils { address: u16, count: u16 },
    ReadDiscreteInputs { address: u16, count: u16 },
    ReadHoldings { address: u16, count: u16 },
    ReadInputs { address: u16, count: u16 },
    WriteCoil { address: u16, value: bool },
    WriteHolding { address: u16, value: u16 },
}

impl Operation {
    pub const fn function_code(&self) -> u8 {
        match self {
            Operation::ReadCoils { .. } => 0x01,
            Operation::ReadDiscreteInputs { .. } => 0x02,
            Operation::ReadHoldings { .. } => 0x03,
            Operation::ReadInputs { .. } => 0x04,
            Operation::WriteCoil { .. } => 0x05,
            Operation::WriteHolding { .. } => 0x06,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    /// Function code of the request this responds to, with the exception bit cleared.
    pub function: u8,
    pub kind: ResponseKind,
}

impl Response {
    /// Check the response answers a request for `expected` function and unwrap its payload.
    pub fn into_result(self, expected: u8) -> Result<ResponseKind, Error> {
        if self.function != expected {
            return Err(Error::UnexpectedResponse { expected, actual: self.function });
        }
        match self.kind {
            ResponseKind::Exception { code } => Err(Error::Exception { function: expected, code }),
            ResponseKind::Malformed => Err(Error::MalformedResponse(expected)),
            kind => Ok(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    Exception { code: u8 },
    /// Packed bit values, least significant bit of the first byte first.
    Bits { values: Vec<u8> },
    Words { values: Vec<u16> },
    WriteCoil { address: u16, value: bool },
    WriteHolding { address: u16, value: u16 },
    /// A complete frame whose PDU could not be parsed. The frame is consumed so the stream stays
    /// usable for later exchanges.
    Malformed,
}

impl ResponseKind {
    pub fn first_bit(&self) -> Option<bool> {
        match self {
            ResponseKind::Bits { values } => values.first().map(|byte| byte & 1 != 0),
            _ => None,
        }
    }

    pub fn first_word(&self) -> Option<u16> {
        match self {
            ResponseKind::Words { values } => values.first().copied(),
            _ => None,
        }
    }
}

/// Modbus TCP (MBAP) framing.
#[derive(Debug, Default)]
pub struct ModbusTcpCodec {}

impl Encoder<Request> for ModbusTcpCodec {
    type Error = std::io::Error;
    fn encode(&mut self, req: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (address, word) = match req.operation {
            Operation::ReadCoils { address, count }
            | Operation::ReadDiscreteInputs { address, count }
            | Operation::ReadHoldings { address, count }
            | Operation::ReadInputs { address, count } => (address, count),
            Operation::WriteCoil { address, value } => (address, if value { 0xFF00 } else { 0 }),
            Operation::WriteHolding { address, value } => (address, value),
        };
        dst.reserve(MBAP_HEADER_LENGTH + 5);
        dst.put_u16(req.transaction_id);
        dst.put_u16(0);
        // unit id, function code, address and the word.
        dst.put_u16(6);
        dst.put_u8(req.device_id);
        dst.put_u8(req.operation.function_code());
        dst.put_u16(address);
        dst.put_u16(word);
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusTcpCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            let Some(header) = src.first_chunk::<MBAP_HEADER_LENGTH>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let protocol = u16::from_be_bytes([header[2], header[3]]);
            let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
            let device_id = header[6];
            // The length covers the unit id and the PDU, which carries at least a function code.
            if protocol != 0 || length < 2 || length > MAX_PDU_LENGTH + 1 {
                src.advance(1);
                continue;
            }
            let frame_length = MBAP_HEADER_LENGTH - 1 + length;
            if src.len() < frame_length {
                src.reserve(frame_length - src.len());
                return Ok(None);
            }
            let frame = src.split_to(frame_length);
            let function = frame[MBAP_HEADER_LENGTH];
            let data = &frame[MBAP_HEADER_LENGTH + 1..];
            let kind = decode_pdu(function, data).unwrap_or_else(|| {
                debug!(message = "malformed response", transaction_id, function, ?data);
                ResponseKind::Malformed
            });
            trace!(message = "decoded a response", transaction_id, function);
            return Ok(Some(Response {
                device_id,
                transaction_id,
                function: function & 0x7F,
                kind,
            }));
        }
    }
}

fn decode_pdu(function: u8, data: &[u8]) -> Option<ResponseKind> {
    if function & 0x80 != 0 {
        let [code] = data else { return None };
        return Some(ResponseKind::Exception { code: *code });
    }
    Some(match function {
        0x01 | 0x02 => {
            let (&byte_count, values) = data.split_first()?;
            if values.len() != usize::from(byte_count) {
                return None;
            }
            ResponseKind::Bits { values: values.to_vec() }
        }
        0x03 | 0x04 => {
            let (&byte_count, values) = data.split_first()?;
            if values.len() != usize::from(byte_count) || values.len() % 2 != 0 {
                return None;
            }
            let values = values.chunks_exact(2).map(|w| u16::from_be_bytes([w[0], w[1]]));
            ResponseKind::Words { values: values.collect() }
        }
        0x05 => {
            let [a, b, v, w] = data else { return None };
            ResponseKind::WriteCoil {
                address: u16::from_be_bytes([*a, *b]),
                value: u16::from_be_bytes([*v, *w]) == 0xFF00,
            }
        }
        0x06 => {
            let [a, b, v, w] = data else { return None };
            ResponseKind::WriteHolding {
                address: u16::from_be_bytes([*a, *b]),
                value: u16::from_be_bytes([*v, *w]),
            }
        }
        _ => return None,
    })
}
