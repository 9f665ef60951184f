//! 外部集成：WhatsApp（Twilio）Webhook

pub mod whatsapp;
