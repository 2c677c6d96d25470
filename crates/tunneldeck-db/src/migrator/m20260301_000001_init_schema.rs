//! Initial schema: endpoints, tunnels, recycle bin and event journal

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ============================================================
        // 1. endpoints
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Endpoint::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Endpoint::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Endpoint::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Endpoint::Url).string_len(1024).not_null())
                    .col(
                        ColumnDef::new(Endpoint::ApiPath)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Endpoint::ApiKey).string_len(255).not_null())
                    .col(ColumnDef::new(Endpoint::Color).string_len(32))
                    .col(ColumnDef::new(Endpoint::Os).string_len(64))
                    .col(ColumnDef::new(Endpoint::Arch).string_len(64))
                    .col(ColumnDef::new(Endpoint::Ver).string_len(64))
                    .col(ColumnDef::new(Endpoint::Log).string_len(32))
                    .col(ColumnDef::new(Endpoint::Tls).string_len(32))
                    .col(ColumnDef::new(Endpoint::Crt).string_len(1024))
                    .col(ColumnDef::new(Endpoint::KeyPath).string_len(1024))
                    .col(ColumnDef::new(Endpoint::Uptime).big_integer())
                    .col(
                        ColumnDef::new(Endpoint::Status)
                            .string_len(16)
                            .not_null()
                            .default("INITIALIZING"),
                    )
                    .col(
                        ColumnDef::new(Endpoint::TunnelCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Endpoint::LastCheck).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Endpoint::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Endpoint::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 2. tunnels
        // ============================================================
        manager
            .create_table(
                tunnel_columns(
                    Table::create()
                        .table(Tunnel::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Tunnel::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Tunnel::EndpointId).big_integer().not_null())
                        .col(ColumnDef::new(Tunnel::InstanceId).string_len(255).not_null())
                        .to_owned(),
                )
                .col(
                    ColumnDef::new(Tunnel::UpdatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_tunnels_endpoint_id")
                        .from(Tunnel::Table, Tunnel::EndpointId)
                        .to(Endpoint::Table, Endpoint::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                        .on_update(ForeignKeyAction::Cascade),
                )
                .to_owned(),
            )
            .await?;

        // At most one row per (endpoint, remote instance)
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tunnels_endpoint_instance")
                    .table(Tunnel::Table)
                    .col(Tunnel::EndpointId)
                    .col(Tunnel::InstanceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 3. tunnel_recycle
        // ============================================================
        manager
            .create_table(
                tunnel_columns(
                    Table::create()
                        .table(TunnelRecycle::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TunnelRecycle::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(TunnelRecycle::EndpointId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TunnelRecycle::InstanceId)
                                .string_len(255)
                                .not_null(),
                        )
                        .to_owned(),
                )
                .col(
                    ColumnDef::new(TunnelRecycle::DeletedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_tunnel_recycle_endpoint_id")
                        .from(TunnelRecycle::Table, TunnelRecycle::EndpointId)
                        .to(Endpoint::Table, Endpoint::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                        .on_update(ForeignKeyAction::Cascade),
                )
                .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tunnel_recycle_endpoint_id")
                    .table(TunnelRecycle::Table)
                    .col(TunnelRecycle::EndpointId)
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 4. endpoint_events (journal)
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(EndpointEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EndpointEvent::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EndpointEvent::EndpointId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(EndpointEvent::InstanceId).string_len(255))
                    .col(
                        ColumnDef::new(EndpointEvent::EventType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(EndpointEvent::Logs).text())
                    .col(ColumnDef::new(EndpointEvent::EventTime).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(EndpointEvent::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_endpoint_events_endpoint_id")
                            .from(EndpointEvent::Table, EndpointEvent::EndpointId)
                            .to(Endpoint::Table, Endpoint::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_endpoint_events_endpoint_created")
                    .table(EndpointEvent::Table)
                    .col(EndpointEvent::EndpointId)
                    .col(EndpointEvent::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_endpoint_events_endpoint_instance")
                    .table(EndpointEvent::Table)
                    .col(EndpointEvent::EndpointId)
                    .col(EndpointEvent::InstanceId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EndpointEvent::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TunnelRecycle::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tunnel::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Endpoint::Table).to_owned())
            .await?;
        Ok(())
    }
}

/// Columns shared by `tunnels` and `tunnel_recycle`
fn tunnel_columns(mut table: TableCreateStatement) -> TableCreateStatement {
    table
        .col(ColumnDef::new(TunnelField::Name).string_len(255).not_null())
        .col(ColumnDef::new(TunnelField::Mode).string_len(16).not_null())
        .col(
            ColumnDef::new(TunnelField::TunnelAddress)
                .string_len(255)
                .not_null()
                .default(""),
        )
        .col(
            ColumnDef::new(TunnelField::TunnelPort)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(TunnelField::TargetAddress)
                .string_len(255)
                .not_null()
                .default(""),
        )
        .col(
            ColumnDef::new(TunnelField::TargetPort)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(TunnelField::TlsMode)
                .string_len(16)
                .not_null()
                .default("inherit"),
        )
        .col(ColumnDef::new(TunnelField::CertPath).string_len(1024))
        .col(ColumnDef::new(TunnelField::KeyPath).string_len(1024))
        .col(
            ColumnDef::new(TunnelField::LogLevel)
                .string_len(16)
                .not_null()
                .default("inherit"),
        )
        .col(ColumnDef::new(TunnelField::CommandLine).text().not_null())
        .col(
            ColumnDef::new(TunnelField::Password)
                .string_len(255)
                .not_null()
                .default(""),
        )
        .col(ColumnDef::new(TunnelField::Min).integer())
        .col(ColumnDef::new(TunnelField::Max).integer())
        .col(
            ColumnDef::new(TunnelField::TcpRx)
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(TunnelField::TcpTx)
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(TunnelField::UdpRx)
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(TunnelField::UdpTx)
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(TunnelField::Restart)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(
            ColumnDef::new(TunnelField::Status)
                .string_len(32)
                .not_null()
                .default(""),
        )
        .col(
            ColumnDef::new(TunnelField::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned()
}

#[derive(DeriveIden)]
enum Endpoint {
    #[sea_orm(iden = "endpoints")]
    Table,
    Id,
    Name,
    Url,
    ApiPath,
    ApiKey,
    Color,
    Os,
    Arch,
    Ver,
    Log,
    Tls,
    Crt,
    KeyPath,
    Uptime,
    Status,
    TunnelCount,
    LastCheck,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tunnel {
    #[sea_orm(iden = "tunnels")]
    Table,
    Id,
    EndpointId,
    InstanceId,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TunnelRecycle {
    Table,
    Id,
    EndpointId,
    InstanceId,
    DeletedAt,
}

#[derive(DeriveIden)]
enum TunnelField {
    Name,
    Mode,
    TunnelAddress,
    TunnelPort,
    TargetAddress,
    TargetPort,
    TlsMode,
    CertPath,
    KeyPath,
    LogLevel,
    CommandLine,
    Password,
    Min,
    Max,
    TcpRx,
    TcpTx,
    UdpRx,
    UdpTx,
    Restart,
    Status,
    CreatedAt,
}

#[derive(DeriveIden)]
enum EndpointEvent {
    #[sea_orm(iden = "endpoint_events")]
    Table,
    Id,
    EndpointId,
    InstanceId,
    EventType,
    Logs,
    EventTime,
    CreatedAt,
}
