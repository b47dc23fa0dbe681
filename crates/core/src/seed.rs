//! First-run catalog written to an empty device.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::catalog::{Classification, Product};
use crate::id::{EmployeeId, ProductId};
use crate::personnel::{Area, Employee};
use crate::transaction::{Transaction, TransactionItem};

pub fn areas() -> Vec<Area> {
    ["Salones", "Bodegas", "Oficinas", "Enfermería", "Canchas"]
        .iter()
        .enumerate()
        .map(|(i, name)| Area {
            id: (i + 1).to_string().into(),
            name: name.to_string(),
        })
        .collect()
}

pub fn products() -> Vec<Product> {
    let rows: [(&str, &str, &str, &str, Classification, u32, u32, (i32, u32, u32)); 5] = [
        ("p1", "Cloro Concentrado", "Clorox", "Litros", Classification::Chemical, 50, 10, (2023, 1, 15)),
        ("p2", "Papel Higiénico Jumbo", "Kimberly Clark", "Rollo", Classification::Paper, 8, 20, (2023, 2, 10)),
        ("p3", "Limpiador Multiusos", "Fabuloso", "Litros", Classification::Chemical, 30, 5, (2023, 3, 1)),
        ("p4", "Guantes de Látex", "Ambiderm", "Caja", Classification::Ppe, 100, 15, (2023, 1, 20)),
        ("p5", "Trapeador Industrial", "Vileda", "Pieza", Classification::Material, 12, 5, (2023, 5, 20)),
    ];

    rows.into_iter()
        .map(|(id, name, brand, unit, classification, stock, min_stock, (y, m, d))| Product {
            id: ProductId::from(id),
            name: name.to_string(),
            brand: brand.to_string(),
            unit: unit.to_string(),
            classification,
            stock,
            min_stock,
            intake_date: NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN),
        })
        .collect()
}

pub fn employees() -> Vec<Employee> {
    vec![
        Employee {
            id: EmployeeId::from("e1"),
            name: "Juan Pérez".to_string(),
            employee_number: "M-001".to_string(),
            areas: vec!["Salones".to_string(), "Bodegas".to_string()],
            permitted_products: ["p1", "p2", "p3", "p5"].into_iter().map(ProductId::from).collect(),
            alert_limit: 10,
        },
        Employee {
            id: EmployeeId::from("e2"),
            name: "Maria González".to_string(),
            employee_number: "M-002".to_string(),
            areas: vec!["Enfermería".to_string(), "Oficinas".to_string()],
            permitted_products: ["p1", "p3", "p4"].into_iter().map(ProductId::from).collect(),
            alert_limit: 5,
        },
    ]
}

/// One over-limit withdrawal dated a week before `now`, so the Smart Lock
/// has prior-week history to work with on a fresh install.
pub fn transactions(now: DateTime<Utc>) -> Vec<Transaction> {
    vec![Transaction {
        id: "t1".into(),
        employee_id: EmployeeId::from("e1"),
        employee_name: "Juan Pérez".to_string(),
        timestamp: now - Duration::days(7),
        items: vec![TransactionItem {
            product_id: ProductId::from("p1"),
            quantity: 12,
            product_name: "Cloro Concentrado".to_string(),
        }],
        anomaly_triggered: true,
        override_used: true,
        supervisor_note: Some("Limpieza profunda autorizada".to_string()),
    }]
}
