pub mod alias;
pub mod auth;
pub mod chat;
pub mod config;
pub mod contacts;
pub mod db;
pub mod error;
pub mod events;
pub mod hooks;
pub mod identity;
pub mod mail;
pub mod models;
pub mod presence;
pub mod reservations;
pub mod routes;
pub mod sweep;

use std::env;

use config::Config;
use db::Db;
use events::EventBus;
use hooks::HookConfig;
use presence::{PresenceIndex, WaitingIndex};
use rocket_cors::CorsOptions;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env().expect("invalid AWEB_* configuration");
    build_rocket(config)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let mut config = Config::from_env().expect("invalid AWEB_* configuration");
    config.database_path = db_path.to_string();
    build_rocket(config)
}

pub fn rocket_with_config(config: Config) -> rocket::Rocket<rocket::Build> {
    build_rocket(config)
}

fn build_rocket(config: Config) -> rocket::Rocket<rocket::Build> {
    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db_path_for_sweeper = config.database_path.clone();
    let db = Db::new(&config.database_path);
    let events = EventBus::new();
    let presence = PresenceIndex::default();
    let waiting = WaitingIndex::default();

    let hook_config = HookConfig {
        url: config.mutation_hook_url.clone(),
        secret: config.mutation_hook_secret.clone(),
    };
    let hook_receiver = events.sender.subscribe();

    let cors = CorsOptions::default().to_cors().expect("failed to build CORS");

    let figment = rocket::Config::figment().merge(("limits.json", 2 * 1024 * 1024));

    rocket::custom(figment)
        .manage(config)
        .manage(db)
        .manage(events)
        .manage(presence)
        .manage(waiting)
        .attach(cors)
        .register("/v1", rocket::catchers![routes::too_many_requests, routes::not_found])
        .mount(
            "/v1",
            rocket::routes![
                routes::init,
                routes::health,
                routes::introspect,
                routes::projects_current,
                routes::stats,
                routes::list_agents,
                routes::heartbeat,
                routes::patch_agent,
                routes::suggest_alias,
                routes::resolve_agent,
                routes::rotate_agent,
                routes::retire_agent,
                routes::deregister_self,
                routes::deregister_peer,
                routes::get_log,
                routes::send_mail,
                routes::inbox,
                routes::acknowledge,
                routes::create_or_send_session,
                routes::list_sessions,
                routes::pending,
                routes::session_history,
                routes::send_session_message,
                routes::mark_read,
                routes::session_stream,
                routes::acquire_reservation,
                routes::renew_reservation,
                routes::release_reservation,
                routes::revoke_reservations,
                routes::list_reservations,
                routes::add_contact,
                routes::list_contacts,
                routes::remove_contact,
                routes::list_conversations,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff("Mutation Hook Dispatcher", move |_rocket| {
            Box::pin(async move {
                hooks::spawn_dispatcher(hook_receiver, hook_config);
                if env::var("AWEB_QUIET_STARTUP").is_err() {
                    println!("mutation hook dispatcher started");
                }
            })
        }))
        .attach(rocket::fairing::AdHoc::on_liftoff("Reservation Sweeper", {
            let db_path = db_path_for_sweeper;
            move |_rocket| {
                Box::pin(async move {
                    sweep::spawn_reservation_sweeper(db_path);
                })
            }
        }))
}
