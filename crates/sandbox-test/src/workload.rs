//! Generated scripts for multi-session tests.

/// Session identifiers in the `<user>_<n>` shape.
pub fn session_ids(user: &str, count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("{}_{}", user, n)).collect()
}

/// A setup script creating `employees` and `departments` with `rows`
/// employees, followed by a query joining them.
pub fn employees_setup(rows: usize) -> String {
    let mut script = String::from(
        "-- departments and employees\n\
         CREATE TABLE departments (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
         CREATE TABLE employees (\n\
         \x20   id INTEGER PRIMARY KEY,\n\
         \x20   name TEXT NOT NULL,\n\
         \x20   dept_id INTEGER REFERENCES departments (id)\n\
         );\n\
         INSERT INTO departments (id, name) VALUES (1, 'Engineering');\n",
    );
    for i in 1..=rows {
        script.push_str(&format!(
            "INSERT INTO employees (id, name, dept_id) VALUES ({}, 'employee; {}', 1);\n",
            i, i
        ));
    }
    script
}

/// A query over the tables of [`employees_setup`].
pub const EMPLOYEES_QUERY: &str =
    "SELECT e.name, d.name FROM employees e JOIN departments d ON d.id = e.dept_id ORDER BY e.id";
