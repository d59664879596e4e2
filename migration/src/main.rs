use migration::Migrator;
use std::{env, fs, path::Path};
use util::config::AppConfig;

mod runner;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let (db_path, run_root) = {
        let config = AppConfig::global();
        (config.database_path.clone(), config.test_run_root.clone())
    };
    let url = format!("sqlite://{}?mode=rwc", db_path);
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("clean") => {
            remove_db_file(&db_path);
            remove_dir(&run_root, "test run scratch space");
        }
        Some("fresh") => {
            remove_db_file(&db_path);
            remove_dir(&run_root, "test run scratch space");
            create_db_dir(&db_path);
            runner::run_all_migrations::<Migrator>(&url).await;
        }
        _ => {
            create_db_dir(&db_path);
            runner::run_all_migrations::<Migrator>(&url).await;
        }
    }
}

fn remove_db_file(path: &str) {
    let db_path = Path::new(path);
    if db_path.exists() {
        fs::remove_file(db_path).expect("Failed to delete DB file");
        println!("Deleted DB: {}", db_path.display());
    } else {
        println!("DB file does not exist: {}", db_path.display());
    }
}

fn remove_dir(path: &str, label: &str) {
    let dir = Path::new(path);
    if dir.exists() {
        fs::remove_dir_all(dir).unwrap_or_else(|e| panic!("Failed to delete {}: {}", label, e));
        println!("Deleted {}: {}", label, dir.display());
    }
}

fn create_db_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent).expect("Failed to create DB directory");
    }
}
