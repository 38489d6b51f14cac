//! Format decoded instances for display (indented dump text).

use crate::value::{Instance, SlotState, Value};

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Raw scalar string; `None` for compound values.
pub fn format_scalar(v: &Value) -> Option<String> {
    Some(match v {
        Value::Null => "null".to_string(),
        Value::Bool(x) => x.to_string(),
        Value::I8(x) => x.to_string(),
        Value::U8(x) => x.to_string(),
        Value::I16(x) => x.to_string(),
        Value::U16(x) => x.to_string(),
        Value::I32(x) => x.to_string(),
        Value::U32(x) => x.to_string(),
        Value::I64(x) => x.to_string(),
        Value::U64(x) => x.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Double(x) => x.to_string(),
        Value::String(s) => format!("{:?}", s),
        Value::Enum { name, index } => format!("{} ({})", name, index),
        _ => return None,
    })
}

/// Multi-line dump of one value. Long byte arrays are truncated to `max_bytes`.
pub fn value_to_dump(v: &Value, indent: usize, max_bytes: usize) -> String {
    let pad = "  ".repeat(indent);
    if let Some(s) = format_scalar(v) {
        return format!("{}{}", pad, s);
    }
    match v {
        Value::Bytes(b) if b.len() > max_bytes => {
            format!("{}hex({} ...) [{} bytes]", pad, hex_string(&b[..max_bytes]), b.len())
        }
        Value::Bytes(b) => format!("{}hex({})", pad, hex_string(b)),
        Value::Struct(inst) => format!("{}{}", pad, instance_to_dump(inst, indent, max_bytes).trim_start()),
        Value::List(items) if items.is_empty() => format!("{}[]", pad),
        Value::List(items) => {
            let mut lines = vec![format!("{}[", pad)];
            for (i, item) in items.iter().enumerate() {
                let sub = value_to_dump(item, indent + 1, max_bytes);
                lines.push(format!("{}  [{}] {}", pad, i, sub.trim_start()));
            }
            lines.push(format!("{}]", pad));
            lines.join("\n")
        }
        Value::Map(entries) if entries.is_empty() => format!("{}{{}}", pad),
        Value::Map(entries) => {
            let mut lines = vec![format!("{}{{", pad)];
            for (k, item) in entries {
                let sub = value_to_dump(item, indent + 1, max_bytes);
                lines.push(format!("{}  {}: {}", pad, k, sub.trim_start()));
            }
            lines.push(format!("{}}}", pad));
            lines.join("\n")
        }
        Value::Variant { tag, value } => {
            let sub = value_to_dump(value, indent, max_bytes);
            format!("{}<{}> {}", pad, format_scalar(tag).unwrap_or_default(), sub.trim_start())
        }
        _ => format!("{}{:?}", pad, v),
    }
}

/// Dump of a structure instance; skipped and unread fields are marked.
pub fn instance_to_dump(inst: &Instance, indent: usize, max_bytes: usize) -> String {
    let pad = "  ".repeat(indent);
    let mut lines = vec![format!("{}{} {{", pad, inst.type_name())];
    for slot in inst.slots() {
        let text = match slot.state {
            SlotState::Skipped => "<skipped>".to_string(),
            SlotState::Pending => "<not read>".to_string(),
            SlotState::Filling | SlotState::Decoded => {
                value_to_dump(&slot.value, indent + 1, max_bytes).trim_start().to_string()
            }
        };
        lines.push(format!("{}  {}: {}", pad, slot.name, text));
    }
    lines.push(format!("{}}}", pad));
    lines.join("\n")
}
