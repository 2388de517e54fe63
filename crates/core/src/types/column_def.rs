use super::{ColumnType, Name, Value};
use crate::error::ValidationError;

/// Immutable descriptor of one column: name, element type, nullability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: Name,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        Self {
            name: Name::simple(name),
            ty,
            nullable,
        }
    }

    /// Element count for vectors, 1 for scalars.
    pub fn logical_size(&self) -> u32 {
        self.ty.logical_size()
    }

    pub fn default_value(&self) -> Value {
        self.ty.default_value()
    }

    /// Reject a cell that does not belong in this column: a null where the
    /// column is non-nullable, a value of the wrong type, or a vector of the
    /// right family but the wrong length.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), ValidationError> {
        let Some(value) = value else {
            return if self.nullable {
                Ok(())
            } else {
                Err(ValidationError::NullInNonNullable(self.name.to_string()))
            };
        };

        let got = value.type_of();
        if got == self.ty {
            return Ok(());
        }
        if got.same_family(&self.ty) {
            return Err(ValidationError::ShapeMismatch {
                expected: self.ty.logical_size(),
                got: got.logical_size(),
            });
        }
        Err(ValidationError::TypeMismatch {
            column: self.name.to_string(),
            expected: self.ty,
            got,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_nullability() {
        let def = ColumnDef::new("id", ColumnType::Long, false);
        assert!(def.validate(Some(&Value::Long(7))).is_ok());
        assert_eq!(
            def.validate(None),
            Err(ValidationError::NullInNonNullable("id".into()))
        );

        let nullable = ColumnDef::new("tag", ColumnType::String, true);
        assert!(nullable.validate(None).is_ok());
    }

    #[test]
    fn validates_type_and_shape() {
        let def = ColumnDef::new("vec", ColumnType::FloatVector(4), false);
        assert!(def
            .validate(Some(&Value::FloatVector(vec![0.0; 4])))
            .is_ok());
        assert_eq!(
            def.validate(Some(&Value::FloatVector(vec![0.0; 3]))),
            Err(ValidationError::ShapeMismatch {
                expected: 4,
                got: 3
            })
        );
        assert!(matches!(
            def.validate(Some(&Value::Long(1))),
            Err(ValidationError::TypeMismatch { .. })
        ));
    }
}
