//! Relational schema as typed constants.
//!
//! Predicates reference columns through these constants, so every column a
//! predicate names exists in `migrations/0001_casefile.sql`. Stores use the
//! declared [`ColumnType`] to decode rows.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tables of the operation object graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Operations,
    UserOperationPermissions,
    Tags,
    Evidence,
    EvidenceMetadata,
    Findings,
    EvidenceFindingMap,
    TagEvidenceMap,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::Users,
        Table::Operations,
        Table::UserOperationPermissions,
        Table::Tags,
        Table::Evidence,
        Table::EvidenceMetadata,
        Table::Findings,
        Table::EvidenceFindingMap,
        Table::TagEvidenceMap,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Operations => "operations",
            Table::UserOperationPermissions => "user_operation_permissions",
            Table::Tags => "tags",
            Table::Evidence => "evidence",
            Table::EvidenceMetadata => "evidence_metadata",
            Table::Findings => "findings",
            Table::EvidenceFindingMap => "evidence_finding_map",
            Table::TagEvidenceMap => "tag_evidence_map",
        }
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Table::Users => users::ALL,
            Table::Operations => operations::ALL,
            Table::UserOperationPermissions => user_operation_permissions::ALL,
            Table::Tags => tags::ALL,
            Table::Evidence => evidence::ALL,
            Table::EvidenceMetadata => evidence_metadata::ALL,
            Table::Findings => findings::ALL,
            Table::EvidenceFindingMap => evidence_finding_map::ALL,
            Table::TagEvidenceMap => tag_evidence_map::ALL,
        }
    }

    /// The generated `id` primary key, for tables that have one.
    pub fn id_column(&self) -> Option<Column> {
        self.columns().iter().copied().find(|c| c.name == "id")
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// BIGINT / BIGSERIAL
    Int,
    Text,
    Bool,
    /// TIMESTAMPTZ
    Timestamp,
    Uuid,
}

/// A column of a specific table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column {
    pub table: Table,
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub const fn new(table: Table, name: &'static str, ty: ColumnType) -> Self {
        Self {
            table,
            name,
            ty,
            nullable: false,
        }
    }

    pub const fn nullable(table: Table, name: &'static str, ty: ColumnType) -> Self {
        Self {
            table,
            name,
            ty,
            nullable: true,
        }
    }

    /// `table.column`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table.name(), self.name)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table.name(), self.name)
    }
}

macro_rules! table_columns {
    ($module:ident, $table:expr, { $($konst:ident : $name:literal => $ctor:ident($ty:ident)),+ $(,)? }) => {
        pub mod $module {
            use super::{Column, ColumnType, Table};

            $(pub const $konst: Column = Column::$ctor($table, $name, ColumnType::$ty);)+

            pub const ALL: &[Column] = &[$($konst),+];
        }
    };
}

table_columns!(users, Table::Users, {
    ID: "id" => new(Int),
    SLUG: "slug" => new(Text),
    FIRST_NAME: "first_name" => new(Text),
    LAST_NAME: "last_name" => new(Text),
    EMAIL: "email" => new(Text),
    ADMIN: "admin" => new(Bool),
});

table_columns!(operations, Table::Operations, {
    ID: "id" => new(Int),
    SLUG: "slug" => new(Text),
    NAME: "name" => new(Text),
    STATUS: "status" => new(Int),
    CREATED_AT: "created_at" => new(Timestamp),
});

table_columns!(user_operation_permissions, Table::UserOperationPermissions, {
    USER_ID: "user_id" => new(Int),
    OPERATION_ID: "operation_id" => new(Int),
    ROLE: "role" => new(Text),
});

table_columns!(tags, Table::Tags, {
    ID: "id" => new(Int),
    OPERATION_ID: "operation_id" => new(Int),
    NAME: "name" => new(Text),
    COLOR_NAME: "color_name" => new(Text),
});

table_columns!(evidence, Table::Evidence, {
    ID: "id" => new(Int),
    UUID: "uuid" => new(Uuid),
    OPERATION_ID: "operation_id" => new(Int),
    OPERATOR_ID: "operator_id" => new(Int),
    DESCRIPTION: "description" => new(Text),
    CONTENT_TYPE: "content_type" => new(Text),
    FULL_IMAGE_KEY: "full_image_key" => new(Text),
    THUMB_IMAGE_KEY: "thumb_image_key" => new(Text),
    OCCURRED_AT: "occurred_at" => new(Timestamp),
});

table_columns!(evidence_metadata, Table::EvidenceMetadata, {
    ID: "id" => new(Int),
    EVIDENCE_ID: "evidence_id" => new(Int),
    SOURCE: "source" => new(Text),
    BODY: "body" => new(Text),
});

table_columns!(findings, Table::Findings, {
    ID: "id" => new(Int),
    UUID: "uuid" => new(Uuid),
    OPERATION_ID: "operation_id" => new(Int),
    CATEGORY: "category" => nullable(Text),
    TITLE: "title" => new(Text),
    DESCRIPTION: "description" => new(Text),
    TICKET_LINK: "ticket_link" => nullable(Text),
    READY_TO_REPORT: "ready_to_report" => new(Bool),
});

table_columns!(evidence_finding_map, Table::EvidenceFindingMap, {
    EVIDENCE_ID: "evidence_id" => new(Int),
    FINDING_ID: "finding_id" => new(Int),
});

table_columns!(tag_evidence_map, Table::TagEvidenceMap, {
    TAG_ID: "tag_id" => new(Int),
    EVIDENCE_ID: "evidence_id" => new(Int),
});
