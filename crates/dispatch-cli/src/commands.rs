//! サンプルコマンド（add / sub / mul）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dispatch_core::{BoxError, CommandReq, Context, Handler, Manager, handler_fn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddCommandReq {
    pub arg_x: i64,
    pub arg_y: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubCommandReq {
    pub arg_x: i64,
    pub arg_y: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MulCommandReq {
    pub arg_x: i64,
    pub arg_y: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArithCommandRes {
    pub result: i64,
}

impl CommandReq for AddCommandReq {
    type Res = ArithCommandRes;
}

impl CommandReq for SubCommandReq {
    type Res = ArithCommandRes;
}

impl CommandReq for MulCommandReq {
    type Res = ArithCommandRes;
}

pub struct AddHandler;

#[async_trait]
impl Handler<AddCommandReq> for AddHandler {
    async fn handle(&self, ctx: &Context, req: AddCommandReq) -> Result<ArithCommandRes, BoxError> {
        debug!(ctx = %ctx.id(), x = req.arg_x, y = req.arg_y, "add");
        let result = req
            .arg_x
            .checked_add(req.arg_y)
            .ok_or_else(|| format!("{} + {} overflows", req.arg_x, req.arg_y))?;
        Ok(ArithCommandRes { result })
    }
}

pub struct SubHandler;

#[async_trait]
impl Handler<SubCommandReq> for SubHandler {
    async fn handle(&self, ctx: &Context, req: SubCommandReq) -> Result<ArithCommandRes, BoxError> {
        debug!(ctx = %ctx.id(), x = req.arg_x, y = req.arg_y, "sub");
        let result = req
            .arg_x
            .checked_sub(req.arg_y)
            .ok_or_else(|| format!("{} - {} overflows", req.arg_x, req.arg_y))?;
        Ok(ArithCommandRes { result })
    }
}

/// add / sub / mul を Manager に登録
pub fn register(manager: &Manager) -> dispatch_core::Result<()> {
    manager.insert_json::<AddCommandReq, _, _>("add", || AddHandler)?;
    manager.insert_json::<SubCommandReq, _, _>("sub", || SubHandler)?;
    manager.insert_json::<MulCommandReq, _, _>("mul", || {
        handler_fn(|_ctx, req: MulCommandReq| async move {
            let result = req
                .arg_x
                .checked_mul(req.arg_y)
                .ok_or_else(|| format!("{} * {} overflows", req.arg_x, req.arg_y))?;
            Ok::<_, BoxError>(ArithCommandRes { result })
        })
    })?;
    Ok(())
}
