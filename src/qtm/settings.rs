//! Capture settings exchanged as XML.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use super::{QtmError, QtmResult};

/// Settings document that sets the measurement length.
///
/// ```text
/// <QTM_Settings><General><Capture_Time>10.000</Capture_Time></General></QTM_Settings>
/// ```
pub fn capture_time_xml(seconds: f64) -> QtmResult<String> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(QtmError::Protocol(format!(
            "capture time must be positive, got {}",
            seconds
        )));
    }

    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(BytesStart::new("QTM_Settings")))?;
    writer.write_event(Event::Start(BytesStart::new("General")))?;
    writer.write_event(Event::Start(BytesStart::new("Capture_Time")))?;
    writer.write_event(Event::Text(BytesText::new(&format!("{:.3}", seconds))))?;
    writer.write_event(Event::End(BytesEnd::new("Capture_Time")))?;
    writer.write_event(Event::End(BytesEnd::new("General")))?;
    writer.write_event(Event::End(BytesEnd::new("QTM_Settings")))?;

    String::from_utf8(writer.into_inner()).map_err(|e| QtmError::Protocol(e.to_string()))
}

/// Read `General/Capture_Time` from a `GetParameters General` reply.
pub fn parse_capture_time(xml: &str) -> Option<f64> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_general = false;
    let mut in_capture_time = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"General" => in_general = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"General" => in_general = false,
            Ok(Event::Start(e)) if in_general && e.name().as_ref() == b"Capture_Time" => {
                in_capture_time = true;
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"Capture_Time" => in_capture_time = false,
            Ok(Event::Text(e)) if in_capture_time => {
                return e.unescape().ok().and_then(|t| t.trim().parse().ok());
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("Error parsing QTM parameters XML: {}", e);
                break;
            }
            _ => {}
        }
    }

    None
}
