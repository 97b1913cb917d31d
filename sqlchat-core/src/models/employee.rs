use serde::Serialize;

/// One seed row of the `Employees` table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeedEmployee {
    pub name: &'static str,
    pub age: i64,
    pub department: &'static str,
    pub salary: f64,
    pub mobile: &'static str,
    pub email: &'static str,
}

pub const SEED_EMPLOYEES: &[SeedEmployee] = &[
    SeedEmployee {
        name: "Alice Smith",
        age: 30,
        department: "Engineering",
        salary: 90000.0,
        mobile: "555-0101",
        email: "alice@example.com",
    },
    SeedEmployee {
        name: "Bob Johnson",
        age: 45,
        department: "Sales",
        salary: 75000.0,
        mobile: "555-0102",
        email: "bob@example.com",
    },
    SeedEmployee {
        name: "Charlie Lee",
        age: 28,
        department: "Marketing",
        salary: 68000.0,
        mobile: "555-0103",
        email: "charlie@example.com",
    },
    SeedEmployee {
        name: "David Brown",
        age: 52,
        department: "Engineering",
        salary: 120000.0,
        mobile: "555-0104",
        email: "david@example.com",
    },
    SeedEmployee {
        name: "Eve Davis",
        age: 35,
        department: "Sales",
        salary: 82000.0,
        mobile: "555-0105",
        email: "eve@example.com",
    },
    SeedEmployee {
        name: "Frank White",
        age: 41,
        department: "HR",
        salary: 72000.0,
        mobile: "555-0106",
        email: "frank@example.com",
    },
];
