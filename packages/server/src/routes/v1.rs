use utoipa_axum::{router::OpenApiRouter, routes};

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest("/auth", auth_routes())
        .nest("/deliveries", delivery_routes())
        .nest("/admin", admin_routes())
        // `/{kind}` must stay below the static prefixes above.
        .merge(reference_routes())
}

fn auth_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::auth::obtain_token))
        .routes(routes!(handlers::auth::refresh_token))
        .routes(routes!(handlers::auth::me))
}

fn delivery_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(
            handlers::delivery::list_deliveries,
            handlers::delivery::create_delivery
        ))
        .routes(routes!(
            handlers::delivery::get_delivery,
            handlers::delivery::replace_delivery,
            handlers::delivery::patch_delivery,
            handlers::delivery::delete_delivery
        ))
        .routes(routes!(handlers::delivery::download_file))
        .layer(handlers::delivery::delivery_body_limit())
}

fn admin_routes() -> OpenApiRouter<AppState> {
    let references = OpenApiRouter::new()
        .routes(routes!(handlers::admin::create_row))
        .routes(routes!(
            handlers::admin::rename_row,
            handlers::admin::delete_row
        ));

    let transfer = OpenApiRouter::new()
        .routes(routes!(handlers::admin::mass_export))
        .routes(routes!(handlers::admin::mass_import))
        .layer(handlers::admin::import_body_limit());

    references.merge(transfer)
}

fn reference_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::reference::list_rows))
        .routes(routes!(handlers::reference::get_row))
}
