//! Line commands a headless peer reads from stdin.
//!
//! ```text
//! add <id> <resource> <start> <end> <name…>
//! rename <id> <name…>
//! move <id> <start> <end>      dates as YYYY-MM-DDTHH:MM[:SS]
//! remove <id> [<id>…]
//! drag <id>
//! resize <id> <start|end> <start> <end>
//! ```

use schedule_collab::model::parse_wire_date;
use schedule_collab::{Event, EventId, FieldChange, FieldPatch, LocalChange, ResizeEdge, ResourceId};

pub fn parse(line: &str) -> Result<LocalChange, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or("empty command")?;

    match verb {
        "add" => {
            let id = parse_id(words.next())?;
            let resource_word = words.next().ok_or("missing resource id")?;
            let resource_id: ResourceId = resource_word
                .parse()
                .map_err(|_| format!("bad resource id {resource_word:?}"))?;
            let start = parse_date(words.next())?;
            let end = parse_date(words.next())?;
            let name = words.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return Err("add needs a name".into());
            }
            Ok(LocalChange::Add(vec![Event::new(id, resource_id, name, start, end)]))
        }
        "rename" => {
            let id = parse_id(words.next())?;
            let name = words.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return Err("rename needs a name".into());
            }
            Ok(LocalChange::Update {
                id,
                patch: FieldPatch::name(name),
            })
        }
        "move" => {
            let id = parse_id(words.next())?;
            let start = parse_date(words.next())?;
            let end = parse_date(words.next())?;
            Ok(LocalChange::Update {
                id,
                patch: FieldPatch::new(vec![FieldChange::StartDate(start), FieldChange::EndDate(end)]),
            })
        }
        "remove" => {
            let ids = words.map(|w| parse_id(Some(w))).collect::<Result<Vec<_>, _>>()?;
            if ids.is_empty() {
                return Err("remove needs at least one id".into());
            }
            Ok(LocalChange::Remove(ids))
        }
        "drag" => Ok(LocalChange::Drag {
            id: parse_id(words.next())?,
        }),
        "resize" => {
            let id = parse_id(words.next())?;
            let edge = match words.next() {
                Some("start") => ResizeEdge::Start,
                Some("end") => ResizeEdge::End,
                other => return Err(format!("resize edge must be start or end, got {other:?}")),
            };
            Ok(LocalChange::Resize {
                id,
                edge,
                start_date: parse_date(words.next())?,
                end_date: parse_date(words.next())?,
            })
        }
        other => Err(format!("unknown command {other:?}")),
    }
}

fn parse_id(word: Option<&str>) -> Result<EventId, String> {
    let word = word.ok_or("missing event id")?;
    word.parse().map_err(|_| format!("bad event id {word:?}"))
}

fn parse_date(word: Option<&str>) -> Result<chrono::NaiveDateTime, String> {
    let word = word.ok_or("missing date")?;
    parse_wire_date(word).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_keeps_spaces() {
        let change = parse("rename 3 Take dog to vet").unwrap();
        assert_eq!(
            change,
            LocalChange::Update {
                id: 3,
                patch: FieldPatch::name("Take dog to vet"),
            }
        );
    }

    #[test]
    fn test_move_parses_dates() {
        let LocalChange::Update { id, patch } = parse("move 1 2019-02-07T12:00 2019-02-07T13:30").unwrap() else {
            panic!("expected update");
        };
        assert_eq!(id, 1);
        assert!(patch.get("startDate").is_some());
        assert!(patch.get("endDate").is_some());
    }

    #[test]
    fn test_remove_and_drag() {
        assert_eq!(parse("remove 4 5").unwrap(), LocalChange::Remove(vec![4, 5]));
        assert_eq!(parse("drag 2").unwrap(), LocalChange::Drag { id: 2 });
    }

    #[test]
    fn test_add_builds_record() {
        let LocalChange::Add(records) = parse("add 15 2 2019-02-07T08:00 2019-02-07T08:15 Stand up").unwrap() else {
            panic!("expected add");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 15);
        assert_eq!(records[0].resource_id, 2);
        assert_eq!(records[0].name, "Stand up");
        assert!(records[0].start_date < records[0].end_date);
    }

    #[test]
    fn test_resize_parses_edge() {
        let LocalChange::Resize { id, edge, .. } = parse("resize 2 end 2019-02-07T10:00 2019-02-07T11:42").unwrap() else {
            panic!("expected resize");
        };
        assert_eq!(id, 2);
        assert_eq!(edge, ResizeEdge::End);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse("").is_err());
        assert!(parse("teleport 1").is_err());
        assert!(parse("rename x Foo").is_err());
        assert!(parse("rename 1").is_err());
        assert!(parse("move 1 tomorrow 2019-02-07T13:30").is_err());
        assert!(parse("remove").is_err());
        assert!(parse("add 15 x 2019-02-07T08:00 2019-02-07T08:15 Stand up").is_err());
        assert!(parse("add 15 2 2019-02-07T08:00 2019-02-07T08:15").is_err());
        assert!(parse("resize 2 middle 2019-02-07T10:00 2019-02-07T11:42").is_err());
    }
}
