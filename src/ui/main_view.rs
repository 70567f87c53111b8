use gpui::prelude::FluentBuilder;

use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, Context, DEBUG_LINES,
    DEFAULT_VIDEO_RATIO, Disableable, IntoElement, ObjectFit, ParentElement, SharedString, Styled,
    StyledExt, StyledImage, Tag, VIDEO_WIDTH, Window, div, h_flex, img, px, v_flex,
};
use crate::types::{SessionSnapshot, SessionState};

const INSTRUCTIONS: &[&str] = &[
    "Stand 1-2 meters away from the camera",
    "Make sure your upper body is visible",
    "Good lighting improves tracking",
    "Face the camera directly",
];

impl AppView {
    pub(super) fn render_main(
        &mut self,
        _window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let snapshot = self.session.snapshot();
        let theme = cx.theme();

        let product = self.session.product();
        let garment_tag = if snapshot.garment_ready {
            Tag::success().rounded_full().child("Garment Ready")
        } else if snapshot.garment_error.is_some() {
            Tag::danger().rounded_full().child("Garment Unavailable")
        } else {
            Tag::secondary().rounded_full().child("Loading Garment")
        };

        let product_card = v_flex()
            .gap_2()
            .p_4()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(div().text_lg().font_semibold().child(product.name.clone()))
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        div()
                            .text_color(theme.muted_foreground)
                            .child(product.display_price()),
                    )
                    .child(garment_tag),
            );

        let is_active = matches!(
            snapshot.state,
            SessionState::Active | SessionState::Starting
        );
        let controls = Button::new(SharedString::from("camera-toggle"))
            .when(is_active, |b| b.danger())
            .when(!is_active, |b| b.primary())
            .label(snapshot.start_label())
            .disabled(!is_active && !snapshot.can_start)
            .on_click(cx.listener(|this, _, _, cx| {
                this.action_error = this.session.toggle_camera().err().map(|err| err.to_string());
                cx.notify();
            }));

        let mut side_panel = v_flex()
            .w(px(320.0))
            .gap_3()
            .child(product_card)
            .child(self.render_status(&snapshot, cx))
            .child(controls);

        if let Some(message) = snapshot.error.as_ref().or(self.action_error.as_ref()) {
            side_panel = side_panel.child(Tag::danger().rounded_full().child(message.clone()));
        }

        side_panel = side_panel.child(render_instructions(cx)).when(
            !snapshot.debug_log.is_empty(),
            |panel| panel.child(render_debug_log(&snapshot, cx)),
        );

        h_flex()
            .size_full()
            .gap_4()
            .p_4()
            .items_start()
            .bg(cx.theme().background)
            .child(side_panel)
            .child(self.render_video(&snapshot))
            .into_any_element()
    }

    fn render_status(&self, snapshot: &SessionSnapshot, cx: &Context<'_, Self>) -> AnyElement {
        let theme = cx.theme();
        let (icon, color) = match snapshot.state {
            SessionState::Active => ("●", theme.success),
            SessionState::Error => ("●", theme.danger),
            SessionState::Ready => ("○", theme.success),
            _ => ("○", theme.muted_foreground),
        };
        h_flex()
            .gap_2()
            .items_center()
            .text_sm()
            .child(div().text_color(color).child(icon))
            .child(
                div()
                    .text_color(theme.foreground)
                    .child(format!("AR system {}", snapshot.state)),
            )
            .into_any_element()
    }

    fn render_video(&self, snapshot: &SessionSnapshot) -> AnyElement {
        let surface = self.session.output();
        let ratio = if surface.height() > 0 {
            surface.width() as f32 / surface.height() as f32
        } else {
            DEFAULT_VIDEO_RATIO
        };

        let content: AnyElement = match (&self.latest_image, snapshot.state) {
            (Some(image), SessionState::Active) => img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .into_any_element(),
            (_, state) => {
                let hint = match state {
                    SessionState::Starting => "Starting camera...",
                    SessionState::Idle | SessionState::Initializing => "Preparing AR system...",
                    _ => "Camera is off",
                };
                div()
                    .size_full()
                    .flex()
                    .items_center()
                    .justify_center()
                    .text_sm()
                    .text_color(gpui::rgb(0x8b95a5))
                    .child(hint)
                    .into_any_element()
            }
        };

        div()
            .w(px(VIDEO_WIDTH))
            .h(px(VIDEO_WIDTH / ratio))
            .overflow_hidden()
            .rounded_lg()
            .bg(gpui::rgb(0x000000))
            .child(content)
            .into_any_element()
    }
}

fn render_instructions(cx: &Context<'_, AppView>) -> AnyElement {
    let theme = cx.theme();
    INSTRUCTIONS
        .iter()
        .fold(
            v_flex()
                .gap_1()
                .text_xs()
                .text_color(theme.muted_foreground)
                .child(div().font_semibold().child("How to use")),
            |list, line| list.child(format!("• {line}")),
        )
        .into_any_element()
}

fn render_debug_log(snapshot: &SessionSnapshot, cx: &Context<'_, AppView>) -> AnyElement {
    let theme = cx.theme();
    let start = snapshot.debug_log.len().saturating_sub(DEBUG_LINES);
    snapshot.debug_log[start..]
        .iter()
        .fold(
            v_flex()
                .gap_0p5()
                .p_2()
                .rounded_md()
                .bg(theme.muted)
                .font_family(theme.mono_font_family.clone())
                .text_xs()
                .text_color(theme.muted_foreground),
            |list, line| list.child(line.clone()),
        )
        .into_any_element()
}
