use chrono::Utc;
use clap::{Parser, Subcommand};
use newsbase_backend::config::Config;
use newsbase_backend::models::db_operations::{news_db_operations, users_db_operations};
use newsbase_backend::models::{Category, CategoryTranslation, Tag, TagTranslation};
use newsbase_backend::setup::db_setup;
use redb::Database;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "setup_cli", author, version, about = "A CLI for initial news setup.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Create the 'users' and/or 'news' databases.
    Setup { db_type: Option<String> },
}

#[derive(Subcommand, Debug)]
enum UserAction {
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        display_name: String,
        #[arg(long)]
        staff: bool,
        #[arg(long)]
        superuser: bool,
    },
    List,
    ChangePassword {
        #[arg(long)]
        username: String,
        #[arg(long)]
        new_password: String,
    },
    /// Allow a deactivated user to log in again.
    Activate {
        #[arg(long)]
        username: String,
    },
    /// Keep the account but refuse its logins.
    Deactivate {
        #[arg(long)]
        username: String,
    },
    Delete {
        #[arg(long)]
        username: String,
    },
}

#[derive(Subcommand, Debug)]
enum CategoryAction {
    Create {
        #[arg(long)]
        slug: String,
        /// Title per language, as LANG=TITLE. Repeatable.
        #[arg(long = "title", value_parser = parse_translation, required = true)]
        titles: Vec<(String, String)>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        hide_on_list: bool,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum TagAction {
    Create {
        #[arg(long)]
        slug: String,
        /// Name per language, as LANG=NAME. Repeatable.
        #[arg(long = "name", value_parser = parse_translation, required = true)]
        names: Vec<(String, String)>,
    },
    List,
}

fn parse_translation(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((language, text)) if !language.trim().is_empty() && !text.trim().is_empty() => {
            Ok((language.trim().to_string(), text.trim().to_string()))
        }
        _ => Err(format!("expected LANG=TEXT, got '{}'", raw)),
    }
}

fn main() {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file).expect("FATAL: Failed to load or parse configuration.");

    match &cli.command {
        Commands::Db { action } => match action {
            DbAction::Setup { db_type } => match db_type.as_deref() {
                Some("users") => setup_users_database(&config),
                Some("news") => setup_news_database(&config),
                Some(other) => eprintln!("❌ Error: Unknown database type '{}'. Use 'users' or 'news'.", other),
                None => {
                    setup_users_database(&config);
                    setup_news_database(&config);
                }
            },
        },
        Commands::User { action } => match action {
            UserAction::Create { username, password, display_name, staff, superuser } => {
                create_user(&config, username, password, display_name, *staff, *superuser);
            }
            UserAction::List => list_users(&config),
            UserAction::ChangePassword { username, new_password } => {
                change_password(&config, username, new_password);
            }
            UserAction::Activate { username } => set_user_active(&config, username, true),
            UserAction::Deactivate { username } => set_user_active(&config, username, false),
            UserAction::Delete { username } => delete_user(&config, username),
        },
        Commands::Category { action } => match action {
            CategoryAction::Create { slug, titles, parent, hide_on_list } => {
                create_category(&config, slug, titles, parent.as_deref(), *hide_on_list);
            }
            CategoryAction::List => list_categories(&config),
        },
        Commands::Tag { action } => match action {
            TagAction::Create { slug, names } => create_tag(&config, slug, names),
            TagAction::List => list_tags(&config),
        },
    }
}

fn setup_users_database(config: &Config) {
    let db_path = config.users_db_path();
    if db_path.exists() {
        println!("ℹ️ Users database already exists at '{}'. Skipping creation.", db_path.display());
        return;
    }
    println!("\nSetting up users database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let mut conn = Connection::open(&db_path).expect("Could not create users database file.");
    match db_setup::setup_users_db(&mut conn) {
        Ok(_) => println!("✅ Users database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up users database: {}", e),
    }
}

fn setup_news_database(config: &Config) {
    let db_path = config.news_db_path();
    if db_path.exists() {
        println!("ℹ️ News database already exists at '{}'. Skipping creation.", db_path.display());
        return;
    }
    println!("\nSetting up news database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let db = Database::create(&db_path).expect("Failed to create news database file.");
    match db_setup::setup_news_db(&db) {
        Ok(_) => println!("✅ News database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up news database: {}", e),
    }
}

fn open_users_db(config: &Config) -> Option<Connection> {
    let db_path = config.users_db_path();
    if !db_path.exists() {
        eprintln!("❌ Error: Users database not found at '{}'. Please run `setup_cli db setup` first.", db_path.display());
        return None;
    }
    match Connection::open(&db_path) {
        Ok(conn) => Some(conn),
        Err(e) => {
            eprintln!("❌ Error opening users database: {}", e);
            None
        }
    }
}

fn open_news_db(config: &Config) -> Option<Database> {
    let db_path = config.news_db_path();
    if !db_path.exists() {
        eprintln!("❌ Error: News database not found at '{}'. Please run `setup_cli db setup` first.", db_path.display());
        return None;
    }
    match Database::open(&db_path) {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("❌ Error opening news database: {}", e);
            None
        }
    }
}

fn create_user(config: &Config, username: &str, password: &str, display_name: &str, staff: bool, superuser: bool) {
    let Some(conn) = open_users_db(config) else { return };
    let display_name = if display_name.trim().is_empty() { username } else { display_name };
    match users_db_operations::create_user(&conn, username, password, display_name, staff, superuser) {
        Ok(id) => println!("✅ User '{}' created with id {}.", username, id),
        Err(e) => eprintln!("❌ Error creating user '{}': {}", username, e),
    }
}

fn list_users(config: &Config) {
    let Some(conn) = open_users_db(config) else { return };
    match users_db_operations::read_all_users(&conn) {
        Ok(users) if users.is_empty() => println!("No users found."),
        Ok(users) => {
            println!("{:<5} {:<20} {:<25} {:<6} {:<10} {:<7}", "ID", "USERNAME", "DISPLAY NAME", "STAFF", "SUPERUSER", "ACTIVE");
            for user in users {
                println!(
                    "{:<5} {:<20} {:<25} {:<6} {:<10} {:<7}",
                    user.id, user.username, user.display_name, user.is_staff, user.is_superuser, user.is_active
                );
            }
        }
        Err(e) => eprintln!("❌ Error listing users: {}", e),
    }
}

fn change_password(config: &Config, username: &str, new_password: &str) {
    let Some(conn) = open_users_db(config) else { return };
    match users_db_operations::change_password(&conn, username, new_password) {
        Ok(0) => eprintln!("❌ Error: User '{}' not found.", username),
        Ok(_) => println!("✅ Password for '{}' changed.", username),
        Err(e) => eprintln!("❌ Error changing password: {}", e),
    }
}

fn set_user_active(config: &Config, username: &str, is_active: bool) {
    let Some(conn) = open_users_db(config) else { return };
    let state = if is_active { "activated" } else { "deactivated" };
    match users_db_operations::set_active(&conn, username, is_active) {
        Ok(0) => eprintln!("❌ Error: User '{}' not found.", username),
        Ok(_) => println!("✅ User '{}' {}.", username, state),
        Err(e) => eprintln!("❌ Error updating user '{}': {}", username, e),
    }
}

fn delete_user(config: &Config, username: &str) {
    let Some(conn) = open_users_db(config) else { return };
    let Some(user) = users_db_operations::read_user_by_username(&conn, username) else {
        eprintln!("❌ Error: User '{}' not found.", username);
        return;
    };
    match users_db_operations::delete_user(&conn, user.id) {
        Ok(_) => println!("✅ User '{}' (id {}) deleted. Their entries keep the author id.", username, user.id),
        Err(e) => eprintln!("❌ Error deleting user '{}': {}", username, e),
    }
}

fn unknown_languages<'a>(config: &Config, pairs: &'a [(String, String)]) -> Vec<&'a str> {
    pairs
        .iter()
        .map(|(language, _)| language.as_str())
        .filter(|language| !config.news.has_language(language))
        .collect()
}

fn create_category(config: &Config, slug: &str, titles: &[(String, String)], parent: Option<&str>, hide_on_list: bool) {
    let unknown = unknown_languages(config, titles);
    if !unknown.is_empty() {
        eprintln!("❌ Error: Languages not configured: {}", unknown.join(", "));
        return;
    }
    let Some(db) = open_news_db(config) else { return };

    let translations: BTreeMap<String, CategoryTranslation> = titles
        .iter()
        .map(|(language, title)| (language.clone(), CategoryTranslation { title: title.clone() }))
        .collect();
    let category = Category {
        slug: slug.to_string(),
        parent: parent.map(|p| p.to_string()),
        hide_on_list,
        translations,
        created_at: Utc::now(),
    };
    match news_db_operations::create_category(&db, &category) {
        Ok(()) => println!("✅ Category '{}' created.", slug),
        Err(e) => eprintln!("❌ Error creating category '{}': {}", slug, e),
    }
}

fn list_categories(config: &Config) {
    let Some(db) = open_news_db(config) else { return };
    match news_db_operations::read_all_categories(&db) {
        Ok(categories) if categories.is_empty() => println!("No categories found."),
        Ok(categories) => {
            println!("{:<20} {:<20} {:<7} {}", "SLUG", "PARENT", "HIDDEN", "TITLE");
            for category in categories {
                println!(
                    "{:<20} {:<20} {:<7} {}",
                    category.slug,
                    category.parent.as_deref().unwrap_or("-"),
                    category.hide_on_list,
                    category.title(&config.news.default_language, &config.news.default_language)
                );
            }
        }
        Err(e) => eprintln!("❌ Error listing categories: {}", e),
    }
}

fn create_tag(config: &Config, slug: &str, names: &[(String, String)]) {
    let unknown = unknown_languages(config, names);
    if !unknown.is_empty() {
        eprintln!("❌ Error: Languages not configured: {}", unknown.join(", "));
        return;
    }
    let Some(db) = open_news_db(config) else { return };

    let translations: BTreeMap<String, TagTranslation> = names
        .iter()
        .map(|(language, name)| (language.clone(), TagTranslation { name: name.clone() }))
        .collect();
    let tag = Tag { slug: slug.to_string(), translations };
    match news_db_operations::create_tag(&db, &tag) {
        Ok(()) => println!("✅ Tag '{}' created.", slug),
        Err(e) => eprintln!("❌ Error creating tag '{}': {}", slug, e),
    }
}

fn list_tags(config: &Config) {
    let Some(db) = open_news_db(config) else { return };
    match news_db_operations::read_all_tags(&db) {
        Ok(tags) if tags.is_empty() => println!("No tags found."),
        Ok(tags) => {
            println!("{:<20} {}", "SLUG", "NAME");
            for tag in tags {
                println!("{:<20} {}", tag.slug, tag.name(&config.news.default_language, &config.news.default_language));
            }
        }
        Err(e) => eprintln!("❌ Error listing tags: {}", e),
    }
}
