//! # Telemetry Decoder
//!
//! Decodes OSC datagrams and validates telemetry messages.
//!
//! The transport hands us whatever arrives on the port, so every message is
//! re-validated here: it must carry exactly 24 arguments, the first one must be
//! a native number, and every argument except the opaque one must be numeric.

use rosc::{OscMessage, OscPacket, OscType};

use crate::error::DecodeError;
use crate::sample::{
    CalibrationStatus, Quaternion, TelemetrySample, Vector3, ARG_NAMES, OPAQUE_ARG_INDEX,
    SAMPLE_ARG_COUNT,
};

/// Unpack one UDP datagram into its OSC messages.
///
/// Bundles are flattened depth-first, preserving the order of their content.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the datagram is not a valid OSC packet
pub fn unpack_datagram(datagram: &[u8]) -> Result<Vec<OscMessage>, DecodeError> {
    if datagram.is_empty() {
        return Err(DecodeError::Malformed("empty datagram".to_string()));
    }

    let (_, packet) = rosc::decoder::decode_udp(datagram)
        .map_err(|e| DecodeError::Malformed(format!("{:?}", e)))?;

    let mut messages = Vec::new();
    flatten(packet, &mut messages);
    Ok(messages)
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(message) => out.push(message),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

/// Decode one telemetry message.
///
/// Pure: the same address and arguments always give the same result.
///
/// # Arguments
///
/// * `address` - OSC address pattern of the message
/// * `args` - Positional arguments in wire order
///
/// # Errors
///
/// Returns error if:
/// - The argument count is not 24
/// - The first argument is not an int/long/float/double
/// - Any numeric field cannot be read as a number
/// - A status or sequence field has a fractional part
///
/// # Examples
///
/// ```
/// use osc_sniffer::osc::decoder::decode_sample;
/// use rosc::OscType;
///
/// let short = vec![OscType::Float(1.0); 10];
/// assert!(decode_sample("/imu", &short).is_err());
/// ```
pub fn decode_sample(address: &str, args: &[OscType]) -> Result<TelemetrySample, DecodeError> {
    if args.len() != SAMPLE_ARG_COUNT {
        return Err(DecodeError::WrongArity {
            expected: SAMPLE_ARG_COUNT,
            found: args.len(),
        });
    }

    if native_number(&args[0]).is_none() {
        return Err(DecodeError::NotTelemetry);
    }

    let num = |index: usize| {
        number(&args[index]).ok_or(DecodeError::NonNumeric {
            index,
            field: ARG_NAMES[index],
        })
    };
    let int = |index: usize| integer(&args[index], index);
    let vec3 = |first: usize| -> Result<Vector3, DecodeError> {
        Ok(Vector3::new(num(first)?, num(first + 1)?, num(first + 2)?))
    };

    Ok(TelemetrySample {
        address: address.to_string(),
        accel: vec3(0)?,
        aux_vector: vec3(3)?,
        gyro: vec3(6)?,
        mag: vec3(9)?,
        orientation: Quaternion::new(num(12)?, num(13)?, num(14)?, num(15)?),
        opaque: args[OPAQUE_ARG_INDEX].clone(),
        battery: num(17)?,
        status: CalibrationStatus {
            sys: int(18)?,
            gyro: int(19)?,
            accel: int(20)?,
            mag: int(21)?,
        },
        device_time: num(22)?,
        sequence: int(23)?,
    })
}

/// Value of an argument that is a number on the wire
fn native_number(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Int(i) => Some(f64::from(*i)),
        OscType::Long(l) => Some(*l as f64),
        OscType::Float(f) => Some(f64::from(*f)),
        OscType::Double(d) => Some(*d),
        _ => None,
    }
}

/// Native numbers, or strings that parse as one
fn number(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::String(s) => s.trim().parse::<f64>().ok(),
        other => native_number(other),
    }
}

fn integer(arg: &OscType, index: usize) -> Result<i64, DecodeError> {
    match arg {
        OscType::Int(i) => Ok(i64::from(*i)),
        OscType::Long(l) => Ok(*l),
        other => {
            let value = number(other).ok_or(DecodeError::NonNumeric {
                index,
                field: ARG_NAMES[index],
            })?;
            if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
                Ok(value as i64)
            } else {
                Err(DecodeError::NonIntegral {
                    index,
                    field: ARG_NAMES[index],
                })
            }
        }
    }
}
