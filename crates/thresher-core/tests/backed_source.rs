//! Loops over store-backed sources: an in-memory table and a file-backed
//! number store.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;

use thresher_core::{
    EngineConfig, EntryReader, EntryStore, Error, LoopManager, PartitionVisitor, Result, Value,
    partition_entries,
};

/// In-memory columnar store used as the reader collaborator in tests.
struct TableStore {
    columns: Vec<(String, Vec<Value>)>,
    rows: u64,
}

impl TableStore {
    fn new(columns: Vec<(&str, Vec<Value>)>) -> Self {
        let rows = columns.first().map_or(0, |(_, v)| v.len()) as u64;
        assert!(
            columns.iter().all(|(_, v)| v.len() as u64 == rows),
            "ragged columns"
        );
        Self {
            columns: columns
                .into_iter()
                .map(|(name, values)| (name.to_string(), values))
                .collect(),
            rows,
        }
    }
}

struct TableReader<'a> {
    columns: &'a [(String, Vec<Value>)],
    remaining: std::ops::Range<u64>,
    current: i64,
}

impl EntryReader for TableReader<'_> {
    fn next(&mut self) -> bool {
        match self.remaining.next() {
            Some(entry) => {
                self.current = entry as i64;
                true
            }
            None => false,
        }
    }

    fn entry_index(&self) -> i64 {
        self.current
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    fn read(&self, name: &str) -> Result<Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values[self.current as usize].clone())
            .ok_or_else(|| Error::Source(format!("no column '{name}' in table")))
    }
}

impl EntryStore for TableStore {
    fn reader(&self) -> Result<Box<dyn EntryReader + '_>> {
        Ok(Box::new(TableReader {
            columns: &self.columns,
            remaining: 0..self.rows,
            current: -1,
        }))
    }

    fn process_parallel(&self, n_partitions: usize, visit: &PartitionVisitor<'_>) -> Result<()> {
        let results: Vec<Result<()>> = partition_entries(self.rows, n_partitions)
            .into_par_iter()
            .map(|chunk| {
                let mut reader = TableReader {
                    columns: &self.columns,
                    remaining: chunk,
                    current: -1,
                };
                visit(&mut reader)
            })
            .collect();
        for result in results {
            result?;
        }
        Ok(())
    }
}

fn int_column(values: impl IntoIterator<Item = i64>) -> Vec<Value> {
    values.into_iter().map(Value::Int).collect()
}

#[test]
fn test_backed_sequential_scan() {
    let store = TableStore::new(vec![(
        "pt",
        vec![
            Value::Float(10.0),
            Value::Float(22.5),
            Value::Float(7.0),
            Value::Float(35.0),
            Value::Float(15.5),
            Value::Float(3.2),
        ],
    )]);
    let mut manager = LoopManager::backed(Box::new(store), EngineConfig::default());

    let high = manager
        .book_filter("high_pt", &["pt"], None, |row| {
            Ok(row.value("pt")?.as_f64().unwrap_or(0.0) >= 10.0)
        })
        .unwrap();
    let sum = Arc::new(Mutex::new(0.0));
    let acc = Arc::clone(&sum);
    manager
        .book_action(&["pt"], Some(high.into()), move |row| {
            *acc.lock().unwrap() += row.value("pt")?.as_f64().unwrap_or(0.0);
            Ok(())
        })
        .unwrap();

    manager.run().unwrap();

    assert_eq!(*sum.lock().unwrap(), 83.0);
    let report = manager.report().unwrap();
    assert_eq!(
        report.summaries()[0].to_string(),
        "high_pt: pass=4 all=6 -- 66.667 %"
    );
}

#[test]
fn test_backed_entries_visited_in_index_order() {
    let store = TableStore::new(vec![("v", int_column(0..25))]);
    let mut manager = LoopManager::backed(Box::new(store), EngineConfig::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager
        .book_action(&[], None, move |row| {
            sink.lock().unwrap().push(row.entry());
            Ok(())
        })
        .unwrap();

    manager.run().unwrap();
    assert_eq!(*seen.lock().unwrap(), (0..25).collect::<Vec<i64>>());
}

#[test]
fn test_backed_parallel_matches_sequential() {
    let config = EngineConfig {
        workers: 4,
        implicit_parallelism: true,
    };
    let store = TableStore::new(vec![("v", int_column(0..100))]);
    let mut manager = LoopManager::backed(Box::new(store), config);
    manager.request_parallelism(true);

    let triple = manager
        .book_filter("triple", &["v"], None, |row| {
            Ok(row.value("v")?.as_i64().unwrap_or(0) % 3 == 0)
        })
        .unwrap();
    let sum = Arc::new(AtomicI64::new(0));
    let acc = Arc::clone(&sum);
    manager
        .book_action(&["v"], Some(triple.into()), move |row| {
            acc.fetch_add(row.value("v")?.as_i64().unwrap_or(0), Ordering::Relaxed);
            Ok(())
        })
        .unwrap();

    manager.run().unwrap();

    // Multiples of 3 in 0..100: 0, 3, ..., 99.
    assert_eq!(sum.load(Ordering::Relaxed), 1683);
    let report = manager.report().unwrap();
    assert_eq!(report.summaries()[0].passed, 34);
    assert_eq!(report.summaries()[0].all, 100);
}

#[test]
fn test_derived_column_over_store_column() {
    let store = TableStore::new(vec![("v", int_column(0..10))]);
    let mut manager = LoopManager::backed(Box::new(store), EngineConfig::default());

    manager.book_column("double", &["v"], |row| {
        Ok(Value::Int(row.value("v")?.as_i64().unwrap_or(0) * 2))
    });
    manager
        .book_filter("big", &["double"], None, |row| {
            Ok(row.value("double")?.as_i64().unwrap_or(0) >= 10)
        })
        .unwrap();

    manager.run().unwrap();

    let report = manager.report().unwrap();
    assert_eq!(report.summaries()[0].passed, 5);
    assert_eq!(report.summaries()[0].all, 10);
}

#[test]
fn test_missing_store_column_fails_at_init() {
    let store = TableStore::new(vec![("v", int_column(0..10))]);
    let mut manager = LoopManager::backed(Box::new(store), EngineConfig::default());
    manager
        .book_filter("cut", &["missing"], None, |_| Ok(true))
        .unwrap();
    assert!(matches!(manager.run(), Err(Error::ColumnNotFound(_))));
}

/// File-backed store: one integer per line under the column name "n".
struct NumberFileStore {
    path: PathBuf,
}

struct NumberFileReader {
    lines: Lines<BufReader<File>>,
    index: i64,
    value: i64,
}

impl EntryReader for NumberFileReader {
    fn next(&mut self) -> bool {
        match self.lines.next() {
            Some(Ok(line)) => {
                self.index += 1;
                self.value = line.trim().parse().unwrap();
                true
            }
            _ => false,
        }
    }

    fn entry_index(&self) -> i64 {
        self.index
    }

    fn has_column(&self, name: &str) -> bool {
        name == "n"
    }

    fn read(&self, name: &str) -> Result<Value> {
        if name == "n" {
            Ok(Value::Int(self.value))
        } else {
            Err(Error::Source(format!("no column '{name}' in number file")))
        }
    }
}

impl NumberFileStore {
    fn load_values(&self) -> Result<Vec<i64>> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Source(format!("read {}: {e}", self.path.display())))?;
        Ok(text.lines().map(|line| line.trim().parse().unwrap()).collect())
    }
}

impl EntryStore for NumberFileStore {
    fn reader(&self) -> Result<Box<dyn EntryReader + '_>> {
        let file = File::open(&self.path)
            .map_err(|e| Error::Source(format!("open {}: {e}", self.path.display())))?;
        Ok(Box::new(NumberFileReader {
            lines: BufReader::new(file).lines(),
            index: -1,
            value: 0,
        }))
    }

    fn process_parallel(&self, n_partitions: usize, visit: &PartitionVisitor<'_>) -> Result<()> {
        // Partitioned scans work off an in-memory snapshot of the file.
        let table = TableStore::new(vec![("n", int_column(self.load_values()?))]);
        table.process_parallel(n_partitions, visit)
    }
}

fn write_number_file(count: i64) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("numbers.txt");
    let mut file = File::create(&path).unwrap();
    for n in 0..count {
        writeln!(file, "{n}").unwrap();
    }
    (dir, path)
}

fn book_even_sum(manager: &mut LoopManager) -> Arc<AtomicI64> {
    let even = manager
        .book_filter("even", &["n"], None, |row| {
            Ok(row.value("n")?.as_i64().unwrap_or(0) % 2 == 0)
        })
        .unwrap();
    let sum = Arc::new(AtomicI64::new(0));
    let acc = Arc::clone(&sum);
    manager
        .book_action(&["n"], Some(even.into()), move |row| {
            acc.fetch_add(row.value("n")?.as_i64().unwrap_or(0), Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
    sum
}

#[test]
fn test_file_backed_sequential_scan() {
    let (_dir, path) = write_number_file(100);
    let mut manager =
        LoopManager::backed(Box::new(NumberFileStore { path }), EngineConfig::default());
    let sum = book_even_sum(&mut manager);

    manager.run().unwrap();

    // 0 + 2 + ... + 98
    assert_eq!(sum.load(Ordering::Relaxed), 2450);
    let report = manager.report().unwrap();
    assert_eq!(
        report.summaries()[0].to_string(),
        "even: pass=50 all=100 -- 50.000 %"
    );
}

#[test]
fn test_file_backed_parallel_scan() {
    let (_dir, path) = write_number_file(100);
    let config = EngineConfig {
        workers: 3,
        implicit_parallelism: true,
    };
    let mut manager = LoopManager::backed(Box::new(NumberFileStore { path }), config);
    manager.request_parallelism(true);
    let sum = book_even_sum(&mut manager);

    manager.run().unwrap();

    assert_eq!(sum.load(Ordering::Relaxed), 2450);
    let report = manager.report().unwrap();
    assert_eq!(report.summaries()[0].passed, 50);
    assert_eq!(report.summaries()[0].all, 100);
}
