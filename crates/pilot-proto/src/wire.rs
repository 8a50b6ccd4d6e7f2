//! Line framing for the vehicle link.
//!
//! Every frame is one JSON object terminated by `\n`, in both directions:
//! commands go out (`{"command":"p"}`), vehicle reports come back.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::command::Command;
use crate::telemetry::VehicleReport;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty frame")]
    Empty,
}

pub fn encode_command(cmd: &Command) -> Result<Bytes, WireError> {
    let body = serde_json::to_vec(cmd)?;
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_slice(&body);
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

pub fn decode_report(line: &str) -> Result<VehicleReport, WireError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(WireError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinate;

    #[test]
    fn clear_commands_carry_only_the_tag() {
        let p = encode_command(&Command::ClearPrevious).unwrap();
        let c = encode_command(&Command::ClearAll).unwrap();
        assert_eq!(&p[..], b"{\"command\":\"p\"}\n");
        assert_eq!(&c[..], b"{\"command\":\"c\"}\n");
    }

    #[test]
    fn move_carries_lat_lng_payload() {
        let frame = encode_command(&Command::Move(Coordinate::new(61.5, 28.25))).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(v["command"], "move");
        assert_eq!(v["data"]["lat"], 61.5);
        assert_eq!(v["data"]["lng"], 28.25);
    }

    #[test]
    fn malformed_reports_are_rejected() {
        assert!(matches!(decode_report("{\"lat\":1}"), Err(WireError::Json(_))));
        assert!(matches!(decode_report("OK"), Err(WireError::Json(_))));
        assert!(matches!(decode_report("   "), Err(WireError::Empty)));
    }

    #[test]
    fn report_optional_fields_default_to_none() {
        let r = decode_report("{\"lat\":37.7749,\"lng\":-122.4194}\n").unwrap();
        assert_eq!(r.position(), Coordinate::new(37.7749, -122.4194));
        assert_eq!(r.battery_pct, None);

        let line = "{\"lat\":1,\"lng\":2,\"battery_pct\":80,\"speed_kmh\":3.5,\"obstacle_cm\":120}";
        let r = decode_report(line).unwrap();
        assert_eq!(r.battery_pct, Some(80));
        assert_eq!(r.speed_kmh, Some(3.5));
        assert_eq!(r.obstacle_cm, Some(120));
    }
}
