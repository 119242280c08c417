use quick_xml::Reader;
use quick_xml::events::Event;

use sinktap_types::LogDocument;

use crate::error::DocumentError;

/// Root element of a syslog message log
const ROOT_ELEMENT: &str = "syslog-message-log";

/// Decoder for reassembled Sink API payloads
pub struct DocumentParser;

impl DocumentParser {
    /// Parse a reassembled payload into a LogDocument
    pub fn parse(payload: &[u8]) -> Result<LogDocument, DocumentError> {
        let xml = std::str::from_utf8(payload)?;
        Self::check_root(xml)?;
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Make sure the first element is the one we know how to decode
    fn check_root(xml: &str) -> Result<(), DocumentError> {
        let mut reader = Reader::from_str(xml);

        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    return if name == ROOT_ELEMENT {
                        Ok(())
                    } else {
                        Err(DocumentError::UnexpectedRoot(name))
                    };
                }
                Event::Eof => return Err(DocumentError::MissingRoot),
                // Declaration, comments, whitespace
                _ => {}
            }
        }
    }
}
