use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Columns managed by the storage layer itself. They can never be set through
/// API payloads; `platform_id` is stamped from the tenant context at insert.
pub const SYSTEM_COLUMNS: &[&str] = &["id", "platform_id", "created_at", "updated_at", "deleted_at"];

/// Closed set of tenant-scoped resource kinds. Nothing outside this enum can
/// be targeted by the isolation layer, so no caller-supplied string ever
/// becomes a SQL identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Students,
    Employees,
    AttendanceRecords,
    Incidents,
    RoleAssignments,
    Semesters,
    Enrollments,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Students => "students",
            ResourceKind::Employees => "employees",
            ResourceKind::AttendanceRecords => "attendance_records",
            ResourceKind::Incidents => "incidents",
            ResourceKind::RoleAssignments => "role_assignments",
            ResourceKind::Semesters => "semesters",
            ResourceKind::Enrollments => "enrollments",
        }
    }

    /// Resolve a path parameter into a registered kind. Unknown names are
    /// rejected here, at the boundary, before any query construction starts.
    pub fn parse(name: &str) -> Option<ResourceKind> {
        match name {
            "students" => Some(ResourceKind::Students),
            "employees" => Some(ResourceKind::Employees),
            "attendance_records" => Some(ResourceKind::AttendanceRecords),
            "incidents" => Some(ResourceKind::Incidents),
            "role_assignments" => Some(ResourceKind::RoleAssignments),
            "semesters" => Some(ResourceKind::Semesters),
            "enrollments" => Some(ResourceKind::Enrollments),
            _ => None,
        }
    }

    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Students,
            ResourceKind::Employees,
            ResourceKind::AttendanceRecords,
            ResourceKind::Incidents,
            ResourceKind::RoleAssignments,
            ResourceKind::Semesters,
            ResourceKind::Enrollments,
        ]
    }

    pub fn descriptor(&self) -> &'static ResourceDescriptor {
        descriptor(*self)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one tenant-scoped table: its name, the owner column
/// carrying the tenant id, and the column allowlists queries may use.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub table: &'static str,
    pub owner_column: &'static str,
    pub filter_columns: &'static [&'static str],
    pub sort_columns: &'static [&'static str],
    pub writable_columns: &'static [&'static str],
}

impl ResourceDescriptor {
    pub fn is_filterable(&self, column: &str) -> bool {
        self.filter_columns.contains(&column)
    }

    pub fn is_sortable(&self, column: &str) -> bool {
        self.sort_columns.contains(&column)
    }

    pub fn is_writable(&self, column: &str) -> bool {
        self.writable_columns.contains(&column)
    }

    /// Columns a caller may project with an explicit select.
    pub fn is_selectable(&self, column: &str) -> bool {
        self.writable_columns.contains(&column)
            || SYSTEM_COLUMNS.contains(&column)
            || self.filter_columns.contains(&column)
            || self.sort_columns.contains(&column)
    }
}

static REGISTRY: Lazy<HashMap<ResourceKind, ResourceDescriptor>> = Lazy::new(|| {
    let descriptors = [
        ResourceDescriptor {
            kind: ResourceKind::Students,
            table: "students",
            owner_column: "platform_id",
            filter_columns: &["student_code", "first_name", "last_name", "email", "is_active"],
            sort_columns: &["created_at", "last_name", "student_code"],
            writable_columns: &[
                "student_code",
                "first_name",
                "last_name",
                "email",
                "is_active",
                "date_of_birth",
                "guardian_name",
            ],
        },
        ResourceDescriptor {
            kind: ResourceKind::Employees,
            table: "employees",
            owner_column: "platform_id",
            filter_columns: &[
                "employee_code",
                "first_name",
                "last_name",
                "email",
                "department",
                "is_active",
            ],
            sort_columns: &["created_at", "last_name", "employee_code"],
            writable_columns: &[
                "employee_code",
                "first_name",
                "last_name",
                "email",
                "department",
                "job_title",
                "is_active",
            ],
        },
        ResourceDescriptor {
            kind: ResourceKind::AttendanceRecords,
            table: "attendance_records",
            owner_column: "platform_id",
            filter_columns: &["person_id", "status", "method", "recorded_on"],
            sort_columns: &["recorded_on", "created_at"],
            writable_columns: &[
                "person_id",
                "person_type",
                "status",
                "method",
                "recorded_on",
                "recorded_at",
                "notes",
            ],
        },
        ResourceDescriptor {
            kind: ResourceKind::Incidents,
            table: "incidents",
            owner_column: "platform_id",
            filter_columns: &["reported_by", "severity", "status", "category"],
            sort_columns: &["created_at", "severity"],
            writable_columns: &[
                "reported_by",
                "severity",
                "status",
                "category",
                "title",
                "description",
            ],
        },
        ResourceDescriptor {
            kind: ResourceKind::RoleAssignments,
            table: "role_assignments",
            owner_column: "platform_id",
            filter_columns: &["user_id", "role", "is_active"],
            sort_columns: &["created_at", "role"],
            writable_columns: &["user_id", "role", "is_active", "granted_by", "expires_on"],
        },
        ResourceDescriptor {
            kind: ResourceKind::Semesters,
            table: "semesters",
            owner_column: "platform_id",
            filter_columns: &["name", "starts_on", "ends_on", "is_current"],
            sort_columns: &["starts_on", "name"],
            writable_columns: &["name", "starts_on", "ends_on", "is_current"],
        },
        ResourceDescriptor {
            kind: ResourceKind::Enrollments,
            table: "enrollments",
            owner_column: "platform_id",
            filter_columns: &["student_id", "semester_id", "status"],
            sort_columns: &["created_at"],
            writable_columns: &["student_id", "semester_id", "status"],
        },
    ];

    descriptors.into_iter().map(|d| (d.kind, d)).collect()
});

pub fn descriptor(kind: ResourceKind) -> &'static ResourceDescriptor {
    // Every enum variant is inserted above; a miss is unreachable
    REGISTRY.get(&kind).expect("registry covers every ResourceKind")
}

/// Reverse lookup used when tenant-binding raw SQL: resolve a table name
/// appearing in a statement back to its registered descriptor.
pub fn descriptor_for_table(table: &str) -> Option<&'static ResourceDescriptor> {
    REGISTRY.values().find(|d| d.table == table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_descriptor() {
        for kind in ResourceKind::all() {
            let desc = descriptor(*kind);
            assert_eq!(desc.kind, *kind);
            assert_eq!(desc.owner_column, "platform_id");
            assert!(!desc.filter_columns.is_empty());
        }
    }

    #[test]
    fn parse_round_trips() {
        for kind in ResourceKind::all() {
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(ResourceKind::parse("users; DROP TABLE users"), None);
        assert_eq!(ResourceKind::parse("platforms"), None);
    }

    #[test]
    fn owner_column_is_never_writable() {
        for kind in ResourceKind::all() {
            let desc = descriptor(*kind);
            assert!(!desc.is_writable(desc.owner_column));
            assert!(!desc.is_writable("id"));
            assert!(!desc.is_writable("created_at"));
        }
    }

    #[test]
    fn table_reverse_lookup() {
        assert_eq!(
            descriptor_for_table("students").map(|d| d.kind),
            Some(ResourceKind::Students)
        );
        assert!(descriptor_for_table("tenants").is_none());
    }
}
