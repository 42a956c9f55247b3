//! REST endpoint handlers for the collaborator API.
//!
//! Reads are served from the engines' in-memory maps. Mutations run on the
//! foreground loop through [`AppState::mutate`]. The acting player comes
//! from the `x-player-id` header.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/status` | Counts, queue depths, economy snapshot |
//! | `GET` | `/api/economy` | Current economy snapshot |
//! | `GET` | `/api/generators` | List generators (`?owner=`) |
//! | `GET` | `/api/generators/{id}` | Single generator |
//! | `POST` | `/api/generators` | Place a generator |
//! | `DELETE` | `/api/generators` | Pick up a generator |
//! | `POST` | `/api/generators/collect` | Collect one generator |
//! | `POST` | `/api/generators/collect-all` | Collect every ready generator |
//! | `POST` | `/api/generators/upgrade` | Buy the next level |
//! | `POST` | `/api/generators/evolve` | Evolve a max-level generator |
//! | `POST` | `/api/generators/leave` | Take a generator out of its network |
//! | `GET` | `/api/networks` | List networks |
//! | `GET` | `/api/networks/{id}` | Single network with members |
//! | `POST` | `/api/networks` | Create a network |
//! | `PATCH` | `/api/networks/{id}` | Rename a network |
//! | `DELETE` | `/api/networks/{id}` | Dismantle a network |
//! | `POST` | `/api/networks/{id}/generators` | Join a generator |
//! | `POST` | `/api/networks/{id}/upgrade` | Buy the next tier |
//! | `PUT` | `/api/networks/{id}/members` | Grant a permission level |
//! | `DELETE` | `/api/networks/{id}/members/{player}` | Remove a grant |
//! | `POST` | `/api/networks/{id}/transfer` | Transfer ownership |
//! | `GET` | `/api/players/{id}/stats` | Player statistics |
//! | `POST` | `/api/players/notifications` | Toggle notifications |

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use genforge_db::StatsStore;
use genforge_types::{
    BlockLocation, EconomySnapshot, GeneratorId, NetworkId, NetworkMember, NetworkSnapshot,
    NetworkTier, PermissionLevel, PlayerId,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Header naming the acting player.
pub const PLAYER_HEADER: &str = "x-player-id";

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// The player a request acts for, read from [`PLAYER_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct ActingPlayer(pub PlayerId);

impl<S: Send + Sync> FromRequestParts<S> for ActingPlayer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(PLAYER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(PlayerId::parse)
            .map(Self)
            .ok_or(ApiError::MissingPlayer)
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/generators`.
#[derive(Debug, Deserialize)]
pub struct GeneratorsQuery {
    /// Only list generators owned by this player (UUID).
    pub owner: Option<String>,
}

/// Request body for `POST /api/generators`.
#[derive(Debug, Deserialize)]
pub struct PlaceRequest {
    /// Where to place the generator.
    pub location: BlockLocation,
    /// Generator type id.
    pub type_id: String,
    /// Display name recorded in player statistics.
    #[serde(default)]
    pub player_name: String,
}

/// Request body naming one generator by location.
#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    /// The generator's location.
    pub location: BlockLocation,
}

/// Request body for `POST /api/networks`.
#[derive(Debug, Deserialize)]
pub struct CreateNetworkRequest {
    /// Network name.
    pub name: String,
    /// Starting tier (default `BASIC`).
    #[serde(default = "default_tier")]
    pub tier: NetworkTier,
}

const fn default_tier() -> NetworkTier {
    NetworkTier::Basic
}

/// Request body for `PATCH /api/networks/{id}`.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    /// New name.
    pub name: String,
}

/// Request body for `POST /api/networks/{id}/generators`.
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    /// Location of the network controller the join is made from.
    pub controller: BlockLocation,
    /// Location of the generator joining.
    pub location: BlockLocation,
}

/// Request body for `PUT /api/networks/{id}/members`.
#[derive(Debug, Deserialize)]
pub struct SetMemberRequest {
    /// Player receiving the grant.
    pub player_id: PlayerId,
    /// Their display name.
    #[serde(default)]
    pub player_name: String,
    /// Level granted.
    pub level: PermissionLevel,
}

/// Request body for `POST /api/networks/{id}/transfer`.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    /// The new owner.
    pub new_owner: PlayerId,
}

/// Response body of `GET /api/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Active generators.
    pub generators: u64,
    /// Networks.
    pub networks: usize,
    /// Statements in flight or queued on the gateway.
    pub pending_operations: usize,
    /// Operations waiting in per-player batches.
    pub queued_batch_operations: usize,
    /// When the server started.
    pub started_at: DateTime<Utc>,
    /// Current economy snapshot.
    pub economy: EconomySnapshot,
}

/// Response body of `GET /api/networks/{id}`.
#[derive(Debug, Serialize)]
pub struct NetworkDetail {
    /// The network.
    pub network: NetworkSnapshot,
    /// Explicit grants, earliest first.
    pub members: Vec<NetworkMember>,
}

/// Response body of boolean mutations.
#[derive(Debug, Serialize)]
struct Changed {
    changed: bool,
}

fn parse_player(raw: &str) -> Result<PlayerId, ApiError> {
    PlayerId::parse(raw).ok_or_else(|| ApiError::InvalidRequest(format!("invalid player id: {raw}")))
}

// ---------------------------------------------------------------------------
// Status and economy
// ---------------------------------------------------------------------------

/// Counts, gateway queue depths, and the economy snapshot.
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let gateway = state.app.gateway();
    Json(StatusResponse {
        generators: state.app.registry().count(),
        networks: state.app.networks().count(),
        pending_operations: gateway.pending_operations(),
        queued_batch_operations: gateway.queued_batch_operations(),
        started_at: state.started_at,
        economy: state.app.economy().current(),
    })
}

/// The current economy snapshot.
pub async fn get_economy(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.app.economy().current())
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// List generators, optionally only one owner's.
pub async fn list_generators(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GeneratorsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = query.owner.as_deref().map(parse_player).transpose()?;
    Ok(Json(state.app.registry().snapshots(owner, Utc::now())))
}

/// A single generator by id.
pub async fn get_generator(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let registry = state.app.registry();
    let generator = registry
        .get_by_id(GeneratorId::new(id))
        .ok_or_else(|| ApiError::NotFound(format!("generator {id} not found")))?;
    Ok(Json(registry.snapshot(&generator, Utc::now())))
}

/// Place a generator.
pub async fn place_generator(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Json(body): Json<PlaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .mutate(move |service| async move {
            service
                .place_generator(
                    player,
                    &body.player_name,
                    body.location,
                    &body.type_id,
                    Utc::now(),
                )
                .await
        })
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Pick up a generator.
pub async fn pickup_generator(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Json(body): Json<LocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .mutate(move |service| async move {
            service
                .pickup_generator(player, &body.location, Utc::now())
                .await
        })
        .await?;
    Ok(Json(snapshot))
}

/// Collect one generator.
pub async fn collect(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Json(body): Json<LocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let amount = state
        .mutate(move |service| async move { service.collect(player, &body.location, Utc::now()) })
        .await?;
    Ok(Json(serde_json::json!({ "amount": amount })))
}

/// Collect every ready generator the player owns.
pub async fn collect_all(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .mutate(move |service| async move { Ok(service.collect_all(player, Utc::now())) })
        .await?;
    Ok(Json(summary))
}

/// Buy the next level of a generator.
pub async fn upgrade_generator(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Json(body): Json<LocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .mutate(move |service| async move {
            service
                .upgrade_generator(player, &body.location, Utc::now())
                .await
        })
        .await?;
    Ok(Json(snapshot))
}

/// Evolve a max-level generator.
pub async fn evolve_generator(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Json(body): Json<LocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .mutate(move |service| async move {
            service
                .evolve_generator(player, &body.location, Utc::now())
                .await
        })
        .await?;
    Ok(Json(snapshot))
}

/// Take a generator out of its network.
pub async fn leave_network(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Json(body): Json<LocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = state
        .mutate(move |service| async move {
            service
                .leave_network(player, &body.location, Utc::now())
                .await
        })
        .await?;
    Ok(Json(Changed { changed }))
}

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// List networks.
pub async fn list_networks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.app.networks().snapshots())
}

/// A single network with its grants.
pub async fn get_network(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let network_id = NetworkId::new(id);
    let network = state
        .app
        .networks()
        .snapshot(network_id)
        .ok_or_else(|| ApiError::NotFound(format!("network {id} not found")))?;
    Ok(Json(NetworkDetail {
        network,
        members: state.app.permissions().members(network_id),
    }))
}

/// Create a network owned by the acting player.
pub async fn create_network(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Json(body): Json<CreateNetworkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let network = state
        .mutate(move |service| async move {
            service
                .create_network(player, &body.name, body.tier, Utc::now())
                .await
        })
        .await?;
    let snapshot = state
        .app
        .networks()
        .snapshot(network.id)
        .ok_or_else(|| ApiError::NotFound(format!("network {} not found", network.id)))?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Rename a network.
pub async fn rename_network(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Path(id): Path<i64>,
    Json(body): Json<RenameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .mutate(move |service| async move {
            service
                .rename_network(player, NetworkId::new(id), &body.name, Utc::now())
                .await
        })
        .await?;
    Ok(Json(Changed { changed: true }))
}

/// Dismantle a network.
pub async fn dismantle_network(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = state
        .mutate(move |service| async move {
            service
                .dismantle_network(player, NetworkId::new(id), Utc::now())
                .await
        })
        .await?;
    Ok(Json(Changed { changed }))
}

/// Put one of the acting player's generators into a network.
pub async fn join_network(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Path(id): Path<i64>,
    Json(body): Json<JoinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = state
        .mutate(move |service| async move {
            service
                .join_network(
                    player,
                    NetworkId::new(id),
                    &body.controller,
                    &body.location,
                    Utc::now(),
                )
                .await
        })
        .await?;
    Ok(Json(Changed { changed }))
}

/// Buy the next tier of a network.
pub async fn upgrade_network(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let tier = state
        .mutate(move |service| async move {
            service
                .upgrade_network(player, NetworkId::new(id), Utc::now())
                .await
        })
        .await?;
    Ok(Json(serde_json::json!({ "tier": tier })))
}

/// Grant a permission level on a network.
pub async fn set_member(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Path(id): Path<i64>,
    Json(body): Json<SetMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = state
        .mutate(move |service| async move {
            service
                .set_member_permission(
                    player,
                    NetworkId::new(id),
                    body.player_id,
                    &body.player_name,
                    body.level,
                    Utc::now(),
                )
                .await
        })
        .await?;
    Ok(Json(member))
}

/// Remove a grant from a network.
pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Path((id, target)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let target = parse_player(&target)?;
    let changed = state
        .mutate(move |service| async move {
            service
                .remove_member(player, NetworkId::new(id), target, Utc::now())
                .await
        })
        .await?;
    Ok(Json(Changed { changed }))
}

/// Hand a network to another player.
pub async fn transfer_network(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
    Path(id): Path<i64>,
    Json(body): Json<TransferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = state
        .mutate(move |service| async move {
            service
                .transfer_network(player, NetworkId::new(id), body.new_owner, Utc::now())
                .await
        })
        .await?;
    Ok(Json(Changed { changed }))
}

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

/// A player's statistics row.
pub async fn get_player_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let player = parse_player(&id)?;
    let stats = StatsStore::new(state.app.gateway())
        .get(player)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no stats for player {player}")))?;
    Ok(Json(stats))
}

/// Flip the acting player's network notification preference.
pub async fn toggle_notifications(
    State(state): State<Arc<AppState>>,
    ActingPlayer(player): ActingPlayer,
) -> Result<impl IntoResponse, ApiError> {
    let enabled = state
        .mutate(move |service| async move { service.toggle_notifications(player).await })
        .await?;
    Ok(Json(serde_json::json!({ "enabled": enabled })))
}
