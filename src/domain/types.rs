//! Shared types for the plate gate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for employee IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EmployeeId(pub i64);

impl std::fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical plate form: uppercase, `[A-Z0-9]` only.
///
/// Idempotent, so it is safe to apply at every boundary where plate text is
/// stored or compared.
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Shortest normalized text ever treated as a plate. Anything shorter is OCR
/// noise, whatever the configured minimum says.
pub const MIN_PLATE_LEN: usize = 3;

/// Normalize recognizer output and drop it if it is too short to be a plate.
/// `min_len` can only raise the floor above [`MIN_PLATE_LEN`].
pub fn plate_candidate(raw: &str, min_len: usize) -> Option<String> {
    let normalized = normalize_plate(raw);
    (normalized.len() >= min_len.max(MIN_PLATE_LEN)).then_some(normalized)
}

/// Employee row joined with its (optional) plate mapping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeWithPlate {
    pub id: EmployeeId,
    pub name: String,
    pub position: String,
    pub plate: Option<String>,
}

/// Result of a plate → employee lookup
#[derive(Debug, Clone, PartialEq)]
pub struct PlateOwner {
    pub employee_id: EmployeeId,
    pub name: String,
}

/// Registration request
#[derive(Debug, Clone, Deserialize)]
pub struct NewEmployee {
    pub name: String,
    pub position: String,
    #[serde(default)]
    pub plate: Option<String>,
}

/// Access log action tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessAction {
    Entry,
    Denied,
}

impl AccessAction {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::Entry => "ENTRY",
            AccessAction::Denied => "DENIED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTRY" => Some(AccessAction::Entry),
            "DENIED" => Some(AccessAction::Denied),
            _ => None,
        }
    }
}

/// Immutable access log record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogEntry {
    pub employee_id: Option<EmployeeId>,
    pub plate_text: Option<String>,
    pub action: AccessAction,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl AccessLogEntry {
    /// Authorized entry by a registered employee
    pub fn entry(employee_id: EmployeeId, plate_text: &str) -> Self {
        Self {
            employee_id: Some(employee_id),
            plate_text: Some(plate_text.to_string()),
            action: AccessAction::Entry,
            detail: "Automated Entry".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Recognized plate with no registry match
    pub fn denied(plate_text: &str) -> Self {
        Self {
            employee_id: None,
            plate_text: Some(plate_text.to_string()),
            action: AccessAction::Denied,
            detail: "Unknown Vehicle".to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Access log row for display, joined with the employee name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogView {
    pub timestamp: DateTime<Utc>,
    /// Employee name, or "Visitor" when the entry has no employee
    pub name: String,
    pub plate_text: Option<String>,
    pub action: AccessAction,
}

/// Detector output in source-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

/// Integer pixel rectangle (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Truncate to integer pixels and clamp to the image.
    /// Returns None for zero-area boxes.
    pub fn to_crop_rect(&self, img_width: u32, img_height: u32) -> Option<CropRect> {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v as u32).min(max)
            }
        };
        let x1 = clamp(self.x1, img_width);
        let y1 = clamp(self.y1, img_height);
        let x2 = clamp(self.x2, img_width);
        let y2 = clamp(self.y2, img_height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(CropRect { x: x1, y: y1, width: x2 - x1, height: y2 - y1 })
    }
}

impl CropRect {
    /// Keep only the left `ratio` of the width (drops a trailing region strip).
    /// Returns None if nothing is left.
    pub fn keep_left(&self, ratio: f32) -> Option<CropRect> {
        let width = (self.width as f32 * ratio) as u32;
        (width > 0).then_some(CropRect { width, ..*self })
    }
}

/// Outcome classification of one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionStatus {
    Granted,
    Denied,
    Failed,
}

impl DecisionStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Granted => "GRANTED",
            DecisionStatus::Denied => "DENIED",
            DecisionStatus::Failed => "FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plate() {
        assert_eq!(normalize_plate("ab-12 34!"), "AB1234");
        assert_eq!(normalize_plate("xyz 123\n"), "XYZ123");
        assert_eq!(normalize_plate(""), "");
        // Non-ASCII letters are stripped, not transliterated
        assert_eq!(normalize_plate("Äb1"), "B1");
    }

    #[test]
    fn test_normalize_plate_idempotent() {
        for raw in ["ab-12 34!", "XYZ123", "  k 9 9 ", "é-1-ü"] {
            let once = normalize_plate(raw);
            assert_eq!(normalize_plate(&once), once);
        }
    }

    #[test]
    fn test_plate_candidate_discards_noise() {
        assert_eq!(plate_candidate("A1", 3), None);
        assert_eq!(plate_candidate("a-1", 3), None);
        assert_eq!(plate_candidate("--", 3), None);
        assert_eq!(plate_candidate("a1b", 3), Some("A1B".to_string()));
    }

    #[test]
    fn test_plate_candidate_floor_ignores_lower_minimum() {
        assert_eq!(plate_candidate("a-1", 1), None);
        assert_eq!(plate_candidate("A1", 0), None);
        assert_eq!(plate_candidate("abc", 1), Some("ABC".to_string()));
        assert_eq!(plate_candidate("abc", 4), None);
    }

    #[test]
    fn test_access_action_roundtrip_str() {
        assert_eq!(AccessAction::parse(AccessAction::Entry.as_str()), Some(AccessAction::Entry));
        assert_eq!(AccessAction::parse(AccessAction::Denied.as_str()), Some(AccessAction::Denied));
        assert_eq!(AccessAction::parse("EXIT"), None);
    }

    #[test]
    fn test_log_entry_constructors() {
        let entry = AccessLogEntry::entry(EmployeeId(7), "XYZ123");
        assert_eq!(entry.employee_id, Some(EmployeeId(7)));
        assert_eq!(entry.action, AccessAction::Entry);
        assert_eq!(entry.detail, "Automated Entry");

        let denied = AccessLogEntry::denied("XYZ123");
        assert_eq!(denied.employee_id, None);
        assert_eq!(denied.action, AccessAction::Denied);
        assert_eq!(denied.detail, "Unknown Vehicle");
    }

    #[test]
    fn test_crop_rect_clamps_to_image() {
        let bbox = BoundingBox { x1: -5.0, y1: 10.7, x2: 250.0, y2: 60.2, score: 0.9 };
        let rect = bbox.to_crop_rect(200, 100).unwrap();
        assert_eq!(rect, CropRect { x: 0, y: 10, width: 200, height: 50 });
    }

    #[test]
    fn test_crop_rect_zero_area() {
        let bbox = BoundingBox { x1: 10.0, y1: 10.0, x2: 10.9, y2: 40.0, score: 0.9 };
        assert!(bbox.to_crop_rect(200, 100).is_none());

        let outside = BoundingBox { x1: 300.0, y1: 10.0, x2: 320.0, y2: 40.0, score: 0.9 };
        assert!(outside.to_crop_rect(200, 100).is_none());
    }

    #[test]
    fn test_keep_left_ratio() {
        let rect = CropRect { x: 4, y: 2, width: 100, height: 30 };
        let refined = rect.keep_left(0.85).unwrap();
        assert_eq!(refined, CropRect { x: 4, y: 2, width: 85, height: 30 });

        let sliver = CropRect { x: 0, y: 0, width: 1, height: 30 };
        assert!(sliver.keep_left(0.85).is_none());
    }

    #[test]
    fn test_decision_status_serializes_uppercase() {
        let json = serde_json::to_string(&DecisionStatus::Granted).unwrap();
        assert_eq!(json, "\"GRANTED\"");
        assert_eq!(DecisionStatus::Failed.as_str(), "FAILED");
    }
}
