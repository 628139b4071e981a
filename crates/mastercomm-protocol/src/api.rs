//! Command table for the master commands the gateway issues itself.
//!
//! Each function builds the [`MasterCommandSpec`] of one command. Specs are
//! cheap to build; callers that issue a command often keep one around.

use crate::field::Field;
use crate::spec::MasterCommandSpec;

/// Action code of the firmware version probe. Older slave modules do not
/// answer it, so its timeouts are not counted as failures.
pub const FIRMWARE_VERSION_ACTION: [u8; 2] = *b"FV";

/// Action code of the output status event.
pub const OUTPUT_LIST_ACTION: [u8; 2] = *b"OL";

fn end() -> Field {
    Field::lit(&b"\r\n"[..])
}

/// Execute a basic action.
///
/// Inputs: `action_type`, `action_number`. Output: `resp`.
pub fn basic_action() -> MasterCommandSpec {
    MasterCommandSpec::new(
        *b"BA",
        vec![
            Field::byte("action_type"),
            Field::byte("action_number"),
            Field::padding(11),
        ],
        vec![Field::string("resp", 2), Field::padding(11), end()],
    )
}

/// Execute a basic action that takes an extra parameter byte.
pub fn basic_action_with_parameter() -> MasterCommandSpec {
    MasterCommandSpec::new(
        *b"BA",
        vec![
            Field::byte("action_type"),
            Field::byte("action_number"),
            Field::byte("parameter"),
            Field::padding(10),
        ],
        vec![Field::string("resp", 2), Field::padding(11), end()],
    )
}

/// Switch the master to its command line interface. There is no reply.
pub fn to_cli_mode() -> MasterCommandSpec {
    MasterCommandSpec::new(*b"CM", vec![Field::padding(13)], vec![])
}

/// Output status event, sent by the master whenever outputs change.
pub fn output_list() -> MasterCommandSpec {
    MasterCommandSpec::new(OUTPUT_LIST_ACTION, vec![], vec![Field::outputs("outputs"), end()])
}

/// Error counters of all modules.
pub fn error_list() -> MasterCommandSpec {
    MasterCommandSpec::new(
        *b"el",
        vec![Field::padding(13)],
        vec![Field::error_list("errors"), Field::crc(), end()],
    )
}

fn sensor_list(action: [u8; 2], prefix: &str) -> MasterCommandSpec {
    let mut outputs: Vec<Field> = (0..32).map(|i| Field::svt(format!("{prefix}{i}"))).collect();
    outputs.push(Field::crc());
    outputs.push(end());
    MasterCommandSpec::new(action, vec![Field::padding(13)], outputs)
}

/// Temperatures of all 32 sensors, `tmp0` to `tmp31`.
pub fn sensor_temperature_list() -> MasterCommandSpec {
    sensor_list(*b"tl", "tmp")
}

/// Humidity of all 32 sensors, `hum0` to `hum31`.
pub fn sensor_humidity_list() -> MasterCommandSpec {
    sensor_list(*b"hl", "hum")
}

/// Ad hoc command that sends `data_len` raw bytes (or 13 bytes of padding)
/// and expects `size` raw bytes back in `data`.
pub fn raw_action(action: [u8; 2], size: usize, data_len: Option<usize>) -> MasterCommandSpec {
    let input = match data_len {
        Some(len) => Field::bytes("data", len),
        None => Field::padding(13),
    };
    MasterCommandSpec::new(action, vec![input], vec![Field::bytes("data", size), end()])
}

/// Firmware version probe of a slave module.
pub fn firmware_version() -> MasterCommandSpec {
    MasterCommandSpec::new(
        FIRMWARE_VERSION_ACTION,
        vec![Field::byte("addr"), Field::padding(12)],
        vec![
            Field::byte("addr"),
            Field::byte("f1"),
            Field::byte("f2"),
            Field::byte("f3"),
            Field::padding(9),
            end(),
        ],
    )
}
