//! Capability interfaces and the fields they inject.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{
  definition::LocalizedText,
  field::{FieldMetadata, FieldSource, FieldType},
};

/// Sort order base for injected fields so they land after custom fields.
const INTERFACE_SORT_BASE: i32 = 1000;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum InterfaceKind {
  /// `IsDeleted`, `DeletedAt`, `DeletedBy`; deletes become flag updates.
  SoftDelete,
  /// `Code` (unique) and `Name`.
  Archive,
  /// Creation and modification stamps filled by the engine.
  Audit,
  /// `Version` column used for optimistic concurrency.
  Version,
  /// Validity window.
  TimeVersion,
}

impl InterfaceKind {
  /// The field templates this interface guarantees.
  pub fn fields(self) -> Vec<FieldMetadata> {
    let fields = match self {
      Self::SoftDelete => vec![
        template("IsDeleted", FieldType::Boolean, "Deleted")
          .required()
          .default_value("false"),
        template("DeletedAt", FieldType::DateTime, "Deleted at"),
        template("DeletedBy", FieldType::String, "Deleted by").length(100),
      ],
      Self::Archive => vec![
        template("Code", FieldType::String, "Code").length(64).required(),
        template("Name", FieldType::String, "Name").length(256).required(),
      ],
      Self::Audit => vec![
        template("CreatedAt", FieldType::DateTime, "Created at")
          .required()
          .default_value("NOW"),
        template("CreatedBy", FieldType::String, "Created by").length(100),
        template("UpdatedAt", FieldType::DateTime, "Updated at"),
        template("UpdatedBy", FieldType::String, "Updated by").length(100),
      ],
      Self::Version => vec![
        template("Version", FieldType::Integer, "Version")
          .required()
          .default_value("1"),
      ],
      Self::TimeVersion => vec![
        template("ValidFrom", FieldType::DateTime, "Valid from")
          .required()
          .default_value("NOW"),
        template("ValidTo", FieldType::DateTime, "Valid to"),
        template("VersionNo", FieldType::Integer, "Version number")
          .required()
          .default_value("1"),
      ],
    };
    fields
      .into_iter()
      .enumerate()
      .map(|(i, f)| f.sort_order(INTERFACE_SORT_BASE + self.ordinal() * 10 + i as i32))
      .collect()
  }

  /// Fields the engine fills itself; callers may not write them.
  pub fn managed_fields(self) -> &'static [&'static str] {
    match self {
      Self::SoftDelete => &["IsDeleted", "DeletedAt", "DeletedBy"],
      Self::Audit => &["CreatedAt", "CreatedBy", "UpdatedAt", "UpdatedBy"],
      Self::Version => &["Version"],
      Self::Archive | Self::TimeVersion => &[],
    }
  }

  /// Fields that receive a unique index.
  pub fn unique_fields(self) -> &'static [&'static str] {
    match self {
      Self::Archive => &["Code"],
      _ => &[],
    }
  }

  pub fn provides(self, property_name: &str) -> bool {
    self
      .fields()
      .iter()
      .any(|f| f.property_name.eq_ignore_ascii_case(property_name))
  }

  fn ordinal(self) -> i32 {
    match self {
      Self::SoftDelete => 0,
      Self::Archive => 1,
      Self::Audit => 2,
      Self::Version => 3,
      Self::TimeVersion => 4,
    }
  }
}

fn template(name: &str, data_type: FieldType, label: &str) -> FieldMetadata {
  let mut field = FieldMetadata::new(name, data_type).source(FieldSource::Interface);
  field.display_name = LocalizedText::new("en", label);
  field
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn every_template_is_interface_sourced() {
    for kind in InterfaceKind::iter() {
      let fields = kind.fields();
      assert!(!fields.is_empty(), "{kind} injects nothing");
      assert!(fields.iter().all(|f| f.source == FieldSource::Interface));
      for managed in kind.managed_fields() {
        assert!(kind.provides(managed), "{kind} manages {managed} it does not provide");
      }
    }
  }

  #[test]
  fn archive_code_is_unique() {
    assert_eq!(InterfaceKind::Archive.unique_fields(), &["Code"]);
    assert!(InterfaceKind::Archive.provides("code"));
    assert!(!InterfaceKind::Audit.provides("Code"));
  }
}
