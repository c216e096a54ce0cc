//! MCP tool handlers.
//!
//! Every tool returns CSV with a stable header. When more pages exist, the
//! continuation cursor rides in the last row's `cursor` column; clients that
//! treat tool output as a single string re-submit it verbatim.

pub mod channels;
pub mod conversations;

use serde::Serialize;

use crate::error::{Error, Result};

/// A CSV-serializable row with a fixed header, emitted even for empty pages.
pub trait CsvRow: Serialize {
    const HEADERS: &'static [&'static str];
}

/// One message row as served to clients. Field order is the CSV column order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageRow {
    pub user_id: String,
    pub user_name: String,
    pub real_name: String,
    pub channel: String,
    pub thread_ts: String,
    pub text: String,
    pub time: String,
    pub cursor: String,
}

impl CsvRow for MessageRow {
    const HEADERS: &'static [&'static str] = &[
        "user_id",
        "user_name",
        "real_name",
        "channel",
        "thread_ts",
        "text",
        "time",
        "cursor",
    ];
}

/// One channel row for the list tool and the directory resource.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub topic: String,
    pub purpose: String,
    pub member_count: i64,
    pub cursor: String,
}

impl CsvRow for ChannelRow {
    const HEADERS: &'static [&'static str] =
        &["id", "name", "topic", "purpose", "member_count", "cursor"];
}

pub fn to_csv<T: CsvRow>(rows: &[T]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(T::HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| Error::BadRequest(format!("non-UTF8 CSV output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_csv_pins_column_order() {
        let rows = vec![MessageRow {
            user_id: "U1".into(),
            user_name: "alice".into(),
            real_name: "Alice".into(),
            channel: "C1".into(),
            thread_ts: String::new(),
            text: "hi".into(),
            time: "1.000000".into(),
            cursor: String::new(),
        }];
        let csv = to_csv(&rows).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(
            header,
            "user_id,user_name,real_name,channel,thread_ts,text,time,cursor"
        );
    }

    #[test]
    fn channel_csv_pins_column_order() {
        let rows = vec![ChannelRow {
            id: "C1".into(),
            name: "#general".into(),
            member_count: 3,
            ..Default::default()
        }];
        let csv = to_csv(&rows).unwrap();
        assert_eq!(
            csv.lines().next().unwrap(),
            "id,name,topic,purpose,member_count,cursor"
        );
        assert!(csv.lines().nth(1).unwrap().starts_with("C1,#general"));
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let rows = vec![MessageRow {
            text: "a, b".into(),
            ..Default::default()
        }];
        let csv = to_csv(&rows).unwrap();
        assert!(csv.contains("\"a, b\""));
    }

    #[test]
    fn empty_result_still_carries_the_header() {
        let csv = to_csv::<ChannelRow>(&[]).unwrap();
        assert_eq!(csv.trim_end(), "id,name,topic,purpose,member_count,cursor");
    }
}
