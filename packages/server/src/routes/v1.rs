use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::job::list_jobs))
        .nest("/motion-data", motion_routes())
        .nest("/jobs", job_routes())
}

fn motion_routes() -> OpenApiRouter<AppState> {
    let upload = OpenApiRouter::new()
        .routes(routes!(handlers::motion::upload_files))
        .layer(handlers::motion::upload_body_limit());

    OpenApiRouter::new()
        .routes(routes!(handlers::motion::create_download))
        .routes(routes!(handlers::motion::get_file))
        .routes(routes!(handlers::motion::retry_file))
        .routes(routes!(handlers::motion::query_file))
        .routes(routes!(handlers::motion::preview_file))
        .routes(routes!(handlers::motion::export_csv))
        .merge(upload)
}

fn job_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::job::get_job))
        .routes(routes!(handlers::job::download_archive))
        .routes(routes!(handlers::job::job_events))
}
