//! Terminal output helpers: a small padded table used by the build
//! summary and the cache dump.

use colored::Colorize;

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Table {
        Table {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        if row.len() == self.headers.len() {
            self.rows.push(row);
        }
    }

    pub fn print(&self) {
        let cols = self.headers.len();
        if cols == 0 {
            return;
        }
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let line = |l: &str, m: &str, r: &str| {
            let mut s = String::from("  ");
            s.push_str(l);
            for (i, w) in widths.iter().enumerate() {
                s.push_str(&"─".repeat(w + 2));
                s.push_str(if i + 1 < cols { m } else { r });
            }
            s
        };

        println!("{}", line("┌", "┬", "┐"));
        print!("  │");
        for (i, h) in self.headers.iter().enumerate() {
            print!(" {}{} │", h.bold(), " ".repeat(widths[i] - h.chars().count()));
        }
        println!();
        println!("{}", line("├", "┼", "┤"));
        for row in &self.rows {
            print!("  │");
            for (i, cell) in row.iter().enumerate() {
                print!(" {}{} │", cell, " ".repeat(widths[i] - cell.chars().count()));
            }
            println!();
        }
        println!("{}", line("└", "┴", "┘"));
    }
}
