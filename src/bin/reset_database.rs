use survival_scores::{config::Config, establish_connection, reset_database, run_migrations};

fn main() {
    let config = Config::load();
    let mut conn =
        establish_connection(&config.database).expect("Failed to connect to database");
    run_migrations(&mut conn).expect("Failed to create schema");
    reset_database(&mut conn).expect("Failed to reset database");
    println!("Database at {} has been reset.", config.database.url);
}
