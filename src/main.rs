use std::process::ExitCode;

use folder_store::config::FOLDER_STORE_CONFIG;
use folder_store::logging::setup_logger;
use folder_store::repository::{db_location, initialize_db, new_store, open_connection, FolderStore};

/// Prepares the configured database: creates the folder table if needed and fills in whatever the
/// configured store derives from the parent/child links of existing folders.
fn main() -> ExitCode {
    if let Err(e) = setup_logger(&FOLDER_STORE_CONFIG.log.level) {
        eprintln!("Failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }
    let location = db_location();
    log::info!("Opening database at {}", location.display());
    let con = match open_connection() {
        Ok(con) => con,
        Err(e) => {
            log::error!("Failed to get a connection to the database: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = initialize_db(&con) {
        log::error!("Failed to initialize the database: {e}");
        return ExitCode::FAILURE;
    }
    let kind = FOLDER_STORE_CONFIG.store.kind;
    let store = new_store(kind, &location, FOLDER_STORE_CONFIG.workers());
    log::info!("Migrating folders for the {kind:?} store");
    if let Err(e) = store.migrate(&con) {
        log::error!("Failed to migrate folders: {e}");
        return ExitCode::FAILURE;
    }
    if let Err((_, e)) = con.close() {
        log::warn!("Failed to close the database connection: {e}");
    }
    log::info!("Done");
    ExitCode::SUCCESS
}
