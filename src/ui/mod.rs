//! Desktop host for a [`Session`]. Each render polls the session, runs one
//! scheduler tick and schedules the next frame.

use std::{sync::Arc, time::Instant};

use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, SharedString, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div,
    img, px,
};
use gpui_component::{
    ActiveTheme, Disableable, Root, StyledExt,
    button::{Button, ButtonVariants},
    h_flex,
    tag::Tag,
    v_flex,
};

use crate::session::Session;

mod main_view;
mod render_util;

const VIDEO_WIDTH: f32 = 640.0;
const DEFAULT_VIDEO_RATIO: f32 = 16.0 / 9.0;
const DEBUG_LINES: usize = 6;

pub fn launch_ui(app: &mut App, session: Session) -> gpui::Result<()> {
    let title = format!("Try On: {}", session.product().name);
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some(title.into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(session));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

pub struct AppView {
    session: Session,
    latest_image: Option<Arc<RenderImage>>,
    shown_generation: u64,
    action_error: Option<String>,
}

impl AppView {
    fn new(mut session: Session) -> Self {
        session.mount();
        Self {
            session,
            latest_image: None,
            shown_generation: 0,
            action_error: None,
        }
    }

    fn refresh_image(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        let surface = self.session.output();
        if surface.generation() == self.shown_generation {
            return;
        }
        self.shown_generation = surface.generation();
        if let Some(image) = render_util::surface_to_image(surface) {
            self.replace_latest_image(image, window, cx);
        }
    }

    fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = self.latest_image.replace(new_image) {
            // The sprite atlas keeps every texture until it is dropped explicitly.
            cx.drop_image(old_image, Some(window));
        }
    }

    fn clear_image(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        if let Some(old_image) = self.latest_image.take() {
            cx.drop_image(old_image, Some(window));
        }
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        self.session.poll();
        self.session.tick(Instant::now());
        if self.session.camera().is_active() {
            self.refresh_image(window, cx);
        } else {
            self.clear_image(window, cx);
        }

        self.render_main(window, cx)
    }
}
