//! Presentation state for gestures other users are performing.
//!
//! A remote drag or resize locks the record locally (no drag, no resize)
//! and tags it with the remote user's name and a CSS class. A resize also
//! carries the element width the remote edge implies on the local time
//! axis. The lock is lifted when the resulting `updateEvent` arrives.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::codec::ResizeEdge;
use crate::model::EventId;

/// Default rendered width of the time axis, in pixels.
pub const DEFAULT_VIEW_WIDTH: f64 = 1000.0;

/// Linear date → x mapping over the visible time span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAxis {
    start: NaiveDateTime,
    end: NaiveDateTime,
    width_px: f64,
}

impl TimeAxis {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, width_px: f64) -> Self {
        Self { start, end, width_px }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn width(&self) -> f64 {
        self.width_px
    }

    pub fn set_span(&mut self, start: NaiveDateTime, end: NaiveDateTime) {
        self.start = start;
        self.end = end;
    }

    /// X coordinate of `date`; dates outside the span extrapolate.
    pub fn coordinate(&self, date: NaiveDateTime) -> f64 {
        let span = (self.end - self.start).num_milliseconds();
        if span <= 0 {
            return 0.0;
        }
        let offset = (date - self.start).num_milliseconds();
        offset as f64 / span as f64 * self.width_px
    }

    /// Pixel width between two dates.
    pub fn width_between(&self, start: NaiveDateTime, end: NaiveDateTime) -> f64 {
        (self.coordinate(end) - self.coordinate(start)).abs()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureKind {
    Drag,
    Resize { edge: ResizeEdge, width_px: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteGesture {
    /// Shown on the element as `data-user-name`.
    pub user_name: String,
    pub kind: GestureKind,
}

impl RemoteGesture {
    pub fn css_class(&self) -> String {
        match &self.kind {
            GestureKind::Drag => "b-remote-drag".to_string(),
            GestureKind::Resize { edge, .. } => format!("b-remote-resize-{}", edge.as_str()),
        }
    }

    pub fn width_px(&self) -> Option<f64> {
        match self.kind {
            GestureKind::Resize { width_px, .. } => Some(width_px),
            GestureKind::Drag => None,
        }
    }
}

/// Remote gestures in progress, per record.
#[derive(Debug, Clone, Default)]
pub struct GestureBoard {
    gestures: HashMap<EventId, RemoteGesture>,
}

impl GestureBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_drag(&mut self, id: EventId, user_name: impl Into<String>) {
        let gesture = RemoteGesture {
            user_name: user_name.into(),
            kind: GestureKind::Drag,
        };
        log::trace!("Remote {} on {id} by {}", gesture.css_class(), gesture.user_name);
        self.gestures.insert(id, gesture);
    }

    pub fn begin_resize(&mut self, id: EventId, user_name: impl Into<String>, edge: ResizeEdge, width_px: f64) {
        let gesture = RemoteGesture {
            user_name: user_name.into(),
            kind: GestureKind::Resize { edge, width_px },
        };
        log::trace!("Remote {} on {id} by {} ({width_px:.1}px)", gesture.css_class(), gesture.user_name);
        self.gestures.insert(id, gesture);
    }

    /// Lift the lock on `id`, returning the gesture that held it.
    pub fn clear(&mut self, id: EventId) -> Option<RemoteGesture> {
        self.gestures.remove(&id)
    }

    /// Drop gestures on records that no longer exist.
    pub fn retain(&mut self, mut exists: impl FnMut(EventId) -> bool) {
        self.gestures.retain(|id, _| exists(*id));
    }

    pub fn clear_all(&mut self) {
        self.gestures.clear();
    }

    pub fn get(&self, id: EventId) -> Option<&RemoteGesture> {
        self.gestures.get(&id)
    }

    pub fn is_draggable(&self, id: EventId) -> bool {
        !self.gestures.contains_key(&id)
    }

    pub fn is_resizable(&self, id: EventId) -> bool {
        !self.gestures.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.gestures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gestures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventId, &RemoteGesture)> {
        self.gestures.iter().map(|(id, gesture)| (*id, gesture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 2, 7).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_axis_coordinates() {
        let axis = TimeAxis::new(date(8, 0), date(18, 0), DEFAULT_VIEW_WIDTH);
        assert_eq!(axis.coordinate(date(8, 0)), 0.0);
        assert_eq!(axis.coordinate(date(13, 0)), 500.0);
        assert_eq!(axis.coordinate(date(18, 0)), 1000.0);
        assert!((axis.width_between(date(12, 0), date(10, 0)) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_axis_empty_span() {
        let axis = TimeAxis::new(date(8, 0), date(8, 0), DEFAULT_VIEW_WIDTH);
        assert_eq!(axis.coordinate(date(12, 0)), 0.0);
    }

    #[test]
    fn test_drag_locks_record() {
        let mut board = GestureBoard::new();
        board.begin_drag(4, "Olivia");

        let gesture = board.get(4).unwrap();
        assert_eq!(gesture.user_name, "Olivia");
        assert_eq!(gesture.css_class(), "b-remote-drag");
        assert_eq!(gesture.width_px(), None);
        assert!(!board.is_draggable(4));
        assert!(!board.is_resizable(4));
        assert!(board.is_draggable(5));
    }

    #[test]
    fn test_resize_class_and_clear() {
        let mut board = GestureBoard::new();
        board.begin_resize(2, "Nolan", ResizeEdge::End, 150.0);
        assert_eq!(board.get(2).unwrap().css_class(), "b-remote-resize-end");
        assert_eq!(board.get(2).unwrap().width_px(), Some(150.0));

        let cleared = board.clear(2);
        assert!(cleared.is_some());
        assert!(board.is_resizable(2));
        assert!(board.is_empty());
    }

    #[test]
    fn test_retain_existing() {
        let mut board = GestureBoard::new();
        board.begin_drag(1, "A");
        board.begin_drag(2, "B");
        board.retain(|id| id == 2);
        assert_eq!(board.len(), 1);
        assert!(board.get(2).is_some());
    }
}
