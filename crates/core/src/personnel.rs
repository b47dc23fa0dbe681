//! Staff and work areas.
//!
//! Employees reference areas by *name* on the wire (`areas_asignadas`), so any
//! change to an [`Area`] has to be cascaded explicitly through
//! [`cascade_area_rename`] / [`cascade_area_delete`].

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::{AreaId, EmployeeId, ProductId};

/// A work area (e.g. "Salones").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: AreaId,
    #[serde(rename = "nombre")]
    pub name: String,
}

impl Entity for Area {
    type Id = AreaId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Area {
    /// Create an area with a fresh id; the name is trimmed and must not be blank.
    pub fn new(name: &str) -> DomainResult<Self> {
        Ok(Self {
            id: AreaId::new(),
            name: normalize_area_name(name)?,
        })
    }
}

/// A staff member allowed to draw supplies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "num_empleado")]
    pub employee_number: String,
    #[serde(rename = "areas_asignadas", default)]
    pub areas: Vec<String>,
    #[serde(rename = "productos_permitidos", default)]
    pub permitted_products: Vec<ProductId>,
    /// Weekly per-product quantity above which the Smart Lock considers usage excessive.
    #[serde(rename = "limite_alerta_cantidad")]
    pub alert_limit: u32,
}

impl Entity for Employee {
    type Id = EmployeeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Employee {
    pub fn may_draw(&self, product_id: &ProductId) -> bool {
        self.permitted_products.contains(product_id)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("employee name cannot be empty"));
        }
        if self.alert_limit == 0 {
            return Err(DomainError::validation("alert limit must be greater than zero"));
        }
        Ok(())
    }
}

/// Trim an area name, rejecting blank input.
pub fn normalize_area_name(name: &str) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("area name cannot be empty"));
    }
    Ok(trimmed.to_string())
}

/// Replace every occurrence of `old_name` in assigned areas with `new_name`.
///
/// Returns the number of employees that changed. Set sizes are unchanged.
pub fn cascade_area_rename(employees: &mut [Employee], old_name: &str, new_name: &str) -> usize {
    let mut touched = 0;
    for emp in employees.iter_mut() {
        let mut changed = false;
        for area in emp.areas.iter_mut().filter(|a| a.as_str() == old_name) {
            *area = new_name.to_string();
            changed = true;
        }
        if changed {
            touched += 1;
        }
    }
    touched
}

/// Remove `name` from every employee's assigned areas.
///
/// Returns the number of employees that changed.
pub fn cascade_area_delete(employees: &mut [Employee], name: &str) -> usize {
    let mut touched = 0;
    for emp in employees.iter_mut() {
        let before = emp.areas.len();
        emp.areas.retain(|a| a != name);
        if emp.areas.len() != before {
            touched += 1;
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn employee(id: &str, areas: &[&str]) -> Employee {
        Employee {
            id: EmployeeId::from(id),
            name: "Juan Pérez".to_string(),
            employee_number: "M-001".to_string(),
            areas: areas.iter().map(|a| a.to_string()).collect(),
            permitted_products: vec![ProductId::from("p1")],
            alert_limit: 10,
        }
    }

    #[test]
    fn rename_replaces_name_in_place() {
        let mut emps = vec![
            employee("e1", &["Salones", "Bodegas"]),
            employee("e2", &["Oficinas"]),
        ];
        let touched = cascade_area_rename(&mut emps, "Salones", "Aulas");

        assert_eq!(touched, 1);
        assert_eq!(emps[0].areas, vec!["Aulas", "Bodegas"]);
        assert_eq!(emps[1].areas, vec!["Oficinas"]);
    }

    #[test]
    fn delete_unassigns_everywhere() {
        let mut emps = vec![
            employee("e1", &["Salones", "Bodegas"]),
            employee("e2", &["Bodegas"]),
        ];
        let touched = cascade_area_delete(&mut emps, "Bodegas");

        assert_eq!(touched, 2);
        assert_eq!(emps[0].areas, vec!["Salones"]);
        assert!(emps[1].areas.is_empty());
    }

    #[test]
    fn blank_area_names_are_rejected() {
        assert!(Area::new("   ").is_err());
        assert_eq!(Area::new("  Canchas ").unwrap().name, "Canchas");
    }

    #[test]
    fn validate_rejects_zero_limit() {
        let mut e = employee("e1", &[]);
        e.alert_limit = 0;
        assert!(e.validate().is_err());
    }

    #[test]
    fn missing_assignment_lists_default_to_empty() {
        let json = serde_json::json!({
            "id": "e9",
            "nombre": "Ana",
            "num_empleado": "M-009",
            "limite_alerta_cantidad": 4
        });
        let e: Employee = serde_json::from_value(json).unwrap();
        assert!(e.areas.is_empty());
        assert!(e.permitted_products.is_empty());
    }

    proptest! {
        #[test]
        fn rename_preserves_cardinality(
            areas in prop::collection::vec(prop::sample::select(vec!["Salones", "Bodegas", "Oficinas", "Canchas"]), 0..6)
        ) {
            let mut emps = vec![employee("e1", &areas)];
            let before = emps[0].areas.len();
            cascade_area_rename(&mut emps, "Salones", "Aulas");

            prop_assert_eq!(emps[0].areas.len(), before);
            prop_assert!(!emps[0].areas.iter().any(|a| a == "Salones"));
            let expected_aulas = areas.iter().filter(|a| **a == "Salones").count();
            prop_assert_eq!(emps[0].areas.iter().filter(|a| *a == "Aulas").count(), expected_aulas);
        }
    }
}
