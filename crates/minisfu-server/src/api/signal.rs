use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{extract::State, Json};
use minisfu_protocol::{RelayStatus, SdpKind, SessionDescriptionMessage};

fn require_offer(message: &SessionDescriptionMessage) -> Result<()> {
    if message.kind != SdpKind::Offer {
        return Err(AppError::BadRequest(
            "expected a session description of type offer".to_string(),
        ));
    }
    Ok(())
}

pub async fn publish(
    State(state): State<AppState>,
    Json(offer): Json<SessionDescriptionMessage>,
) -> Result<Json<SessionDescriptionMessage>> {
    require_offer(&offer)?;

    let negotiated = state.sfu.accept_publisher(&offer.sdp).await?;
    tracing::info!(
        "Answered publisher with {} at payload type {}",
        negotiated.codec.name,
        negotiated.codec.payload_type
    );

    Ok(Json(SessionDescriptionMessage::answer(negotiated.answer_sdp)))
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(offer): Json<SessionDescriptionMessage>,
) -> Result<Json<SessionDescriptionMessage>> {
    require_offer(&offer)?;

    let negotiated = state.sfu.accept_subscriber(&offer.sdp).await?;
    if let Some(id) = negotiated.subscriber_id {
        tracing::info!(
            "Answered subscriber {} with {} at payload type {}",
            id,
            negotiated.codec.name,
            negotiated.codec.payload_type
        );
    }

    Ok(Json(SessionDescriptionMessage::answer(negotiated.answer_sdp)))
}

pub async fn status(State(state): State<AppState>) -> Json<RelayStatus> {
    Json(state.sfu.status().await)
}
